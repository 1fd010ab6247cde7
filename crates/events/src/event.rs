use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payrecover_core::Money;

use crate::error::EventError;

/// A domain-agnostic event.
///
/// Events are immutable facts with a stable type name.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "payment-failed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;
}

/// A recurring charge for an invoice was declined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub invoice_ref: String,
    pub customer_ref: String,
    #[serde(default)]
    pub subscription_ref: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub amount_due: i64,
    pub currency: String,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
}

impl PaymentFailed {
    pub fn amount(&self) -> Result<Money, EventError> {
        Ok(Money::new(self.amount_due, &self.currency)?)
    }
}

/// The invoice was eventually paid, by any means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub invoice_ref: String,
    #[serde(default)]
    pub amount_paid: Option<i64>,
}

/// The subscription behind an invoice was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCancelled {
    pub subscription_ref: String,
    #[serde(default)]
    pub invoice_ref: Option<String>,
}

/// Known inbound event kinds; anything else is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PaymentEvent {
    PaymentFailed(PaymentFailed),
    PaymentSucceeded(PaymentSucceeded),
    SubscriptionCancelled(SubscriptionCancelled),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentFailed(_) => "payment-failed",
            PaymentEvent::PaymentSucceeded(_) => "payment-succeeded",
            PaymentEvent::SubscriptionCancelled(_) => "subscription-cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }
}

impl PaymentEvent {
    /// Invoice the event refers to, when it names one.
    pub fn invoice_ref(&self) -> Option<&str> {
        match self {
            PaymentEvent::PaymentFailed(e) => Some(&e.invoice_ref),
            PaymentEvent::PaymentSucceeded(e) => Some(&e.invoice_ref),
            PaymentEvent::SubscriptionCancelled(e) => e.invoice_ref.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<(), EventError> {
        fn required(field: &str, value: &str) -> Result<(), EventError> {
            if value.trim().is_empty() {
                return Err(EventError::Invalid(format!("{field} must not be empty")));
            }
            Ok(())
        }

        match self {
            PaymentEvent::PaymentFailed(e) => {
                required("invoice_ref", &e.invoice_ref)?;
                required("customer_ref", &e.customer_ref)?;
                e.amount()?;
                if let Some(email) = &e.customer_email {
                    if !email.contains('@') {
                        return Err(EventError::Invalid(format!(
                            "customer_email is not an address: {email:?}"
                        )));
                    }
                }
                Ok(())
            }
            PaymentEvent::PaymentSucceeded(e) => required("invoice_ref", &e.invoice_ref),
            PaymentEvent::SubscriptionCancelled(e) => {
                required("subscription_ref", &e.subscription_ref)
            }
        }
    }
}

/// Converts a unix timestamp carried by an event into UTC.
pub(crate) fn from_unix(secs: i64) -> Result<DateTime<Utc>, EventError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| EventError::Invalid(format!("timestamp out of range: {secs}")))
}
