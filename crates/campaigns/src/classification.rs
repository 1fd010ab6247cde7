//! Decline / failure classification.

use serde::{Deserialize, Serialize};

/// Categorised reason a payment attempt failed.
///
/// Durable classifications will not succeed on a plain retry; the customer has
/// to change something first, so they get no automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    InsufficientFunds,
    CardDeclined,
    ProcessingError,
    /// Timeout or 5xx from the processor.
    ProcessorUnavailable,
    ExpiredCard,
    InvalidInstrument,
    LostOrStolen,
    AuthenticationRequired,
    Unknown,
}

impl FailureClassification {
    /// Maps a processor decline code onto a classification.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "insufficient_funds" | "withdrawal_count_limit_exceeded" | "card_velocity_exceeded" => {
                Self::InsufficientFunds
            }
            "card_declined" | "generic_decline" | "do_not_honor" | "try_again_later" => {
                Self::CardDeclined
            }
            "processing_error" | "issuer_not_available" | "reenter_transaction" => {
                Self::ProcessingError
            }
            "processor_unavailable" | "processor_timeout" | "rate_limit" => {
                Self::ProcessorUnavailable
            }
            "expired_card" => Self::ExpiredCard,
            "incorrect_number" | "invalid_account" | "card_not_supported" | "invalid_expiry_year"
            | "invalid_expiry_month" | "invalid_cvc" | "incorrect_cvc" | "invalid_instrument" => {
                Self::InvalidInstrument
            }
            "lost_card" | "stolen_card" | "pickup_card" | "fraudulent" | "lost_or_stolen" => {
                Self::LostOrStolen
            }
            "authentication_required" => Self::AuthenticationRequired,
            _ => Self::Unknown,
        }
    }

    pub fn is_durable(self) -> bool {
        matches!(
            self,
            Self::ExpiredCard
                | Self::InvalidInstrument
                | Self::LostOrStolen
                | Self::AuthenticationRequired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::CardDeclined => "card_declined",
            Self::ProcessingError => "processing_error",
            Self::ProcessorUnavailable => "processor_unavailable",
            Self::ExpiredCard => "expired_card",
            Self::InvalidInstrument => "invalid_instrument",
            Self::LostOrStolen => "lost_or_stolen",
            Self::AuthenticationRequired => "authentication_required",
            Self::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_and_stolen_cards_are_durable() {
        assert!(FailureClassification::from_code("expired_card").is_durable());
        assert!(FailureClassification::from_code("STOLEN_CARD").is_durable());
        assert!(FailureClassification::from_code("incorrect_number").is_durable());
    }

    #[test]
    fn funds_and_generic_declines_are_retryable() {
        for code in ["insufficient_funds", "card_declined", "do_not_honor", "processor_timeout"] {
            assert!(!FailureClassification::from_code(code).is_durable(), "{code}");
        }
    }

    #[test]
    fn unknown_codes_stay_retryable() {
        let c = FailureClassification::from_code("something_new");
        assert_eq!(c, FailureClassification::Unknown);
        assert!(!c.is_durable());
    }

    #[test]
    fn as_str_round_trips_through_from_code() {
        for c in [
            FailureClassification::InsufficientFunds,
            FailureClassification::CardDeclined,
            FailureClassification::ProcessingError,
            FailureClassification::ProcessorUnavailable,
            FailureClassification::ExpiredCard,
            FailureClassification::InvalidInstrument,
            FailureClassification::LostOrStolen,
            FailureClassification::AuthenticationRequired,
            FailureClassification::Unknown,
        ] {
            assert_eq!(FailureClassification::from_code(c.as_str()), c);
        }
    }
}
