//! Inbound payment-outcome events.
//!
//! Payloads arrive signed from the upstream payment processor. They are
//! verified with [`SignatureVerifier`], parsed once into the tagged
//! [`PaymentEvent`] union and validated at this boundary; nothing past the
//! gateway handles untyped JSON.

pub mod envelope;
pub mod error;
pub mod event;
pub mod signature;

pub use envelope::InboundEvent;
pub use error::EventError;
pub use event::{Event, PaymentEvent, PaymentFailed, PaymentSucceeded, SubscriptionCancelled};
pub use signature::{SIGNATURE_HEADER, SignatureError, SignatureVerifier};
