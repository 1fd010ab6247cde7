//! Outbound collaborators: the payment processor and the message delivery
//! provider. Each has an HTTP implementation and a scripted mock.

pub mod delivery;
pub mod mock;
pub mod processor;
pub mod resend;
pub mod stripe;

pub use delivery::{DeliveryError, DeliveryReceipt, MessageDelivery, OutboundMessage};
pub use mock::{MockMessageDelivery, MockPaymentProcessor};
pub use processor::{ChargeOutcome, PaymentProcessor, ProcessorError};
pub use resend::{HttpMessageDelivery, ResendSettings};
pub use stripe::{HttpPaymentProcessor, StripeSettings};
