use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// What the processor answered for a charge retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The invoice is settled.
    Paid,
    /// The processor refused the charge; `code` is its decline code.
    Declined {
        code: String,
        message: Option<String>,
    },
}

/// The processor could not give an answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    #[error("processor timed out")]
    Timeout,

    #[error("processor rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for ProcessorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProcessorError::Timeout
        } else {
            ProcessorError::Unavailable(err.to_string())
        }
    }
}

/// Retries the charge of an invoice on the upstream processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn retry_charge(&self, invoice_ref: &str) -> Result<ChargeOutcome, ProcessorError>;
}

#[async_trait]
impl<T: PaymentProcessor + ?Sized> PaymentProcessor for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn retry_charge(&self, invoice_ref: &str) -> Result<ChargeOutcome, ProcessorError> {
        (**self).retry_charge(invoice_ref).await
    }
}
