//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Currencies whose minor unit is the major unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// An amount owed, in integer minor units of an ISO-4217 currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: String,
}

impl ValueObject for Money {}

impl Money {
    /// Validates the amount (strictly positive) and normalises the currency to upper case.
    pub fn new(amount_minor: i64, currency: impl AsRef<str>) -> DomainResult<Self> {
        if amount_minor <= 0 {
            return Err(DomainError::validation(format!(
                "amount must be positive, got {amount_minor}"
            )));
        }
        let currency = currency.as_ref().trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter ISO code, got {currency:?}"
            )));
        }
        Ok(Self {
            amount_minor,
            currency: currency.to_ascii_uppercase(),
        })
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Amount in major units, e.g. `79.00` for 7900 USD or `7900` for 7900 JPY.
    pub fn format_major(&self) -> String {
        if ZERO_DECIMAL_CURRENCIES.contains(&self.currency.as_str()) {
            return self.amount_minor.to_string();
        }
        format!("{}.{:02}", self.amount_minor / 100, self.amount_minor % 100)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.format_major(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_currency() {
        let m = Money::new(7900, "usd").unwrap();
        assert_eq!(m.currency(), "USD");
        assert_eq!(m.to_string(), "79.00 USD");
    }

    #[test]
    fn zero_decimal_currency_formats_without_fraction() {
        let m = Money::new(7900, "jpy").unwrap();
        assert_eq!(m.format_major(), "7900");
    }

    #[test]
    fn rejects_non_positive_amounts_and_bad_codes() {
        assert!(Money::new(0, "USD").is_err());
        assert!(Money::new(-5, "USD").is_err());
        assert!(Money::new(100, "US").is_err());
        assert!(Money::new(100, "U$D").is_err());
    }

    #[test]
    fn single_digit_cents_are_padded() {
        assert_eq!(Money::new(105, "EUR").unwrap().format_major(), "1.05");
    }
}
