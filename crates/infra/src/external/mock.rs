//! Scripted stand-ins for local runs and tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::delivery::{DeliveryError, DeliveryReceipt, MessageDelivery, OutboundMessage};
use super::processor::{ChargeOutcome, PaymentProcessor, ProcessorError};

type ChargeResult = Result<ChargeOutcome, ProcessorError>;

/// Processor that replays a script, then repeats a default answer.
pub struct MockPaymentProcessor {
    script: Mutex<VecDeque<ChargeResult>>,
    default: ChargeResult,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl MockPaymentProcessor {
    pub fn new(default: ChargeResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn paying() -> Self {
        Self::new(Ok(ChargeOutcome::Paid))
    }

    pub fn declining(code: impl Into<String>) -> Self {
        Self::new(Ok(ChargeOutcome::Declined {
            code: code.into(),
            message: None,
        }))
    }

    /// Answers taken in order before falling back to the default.
    pub fn with_script(mut self, script: impl IntoIterator<Item = ChargeResult>) -> Self {
        if let Ok(queue) = self.script.get_mut() {
            queue.extend(script);
        }
        self
    }

    /// Sleeps before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Invoice references charged so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn retry_charge(&self, invoice_ref: &str) -> Result<ChargeOutcome, ProcessorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invoice_ref.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .script
            .lock()
            .map_err(|_| ProcessorError::Unavailable("mock lock poisoned".into()))?
            .pop_front();
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

/// Delivery that accepts (or refuses) everything and remembers what it saw.
#[derive(Default)]
pub struct MockMessageDelivery {
    failure: Option<DeliveryError>,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockMessageDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self {
            failure: Some(error),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages handed over so far, accepted or not.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageDelivery for MockMessageDelivery {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(DeliveryReceipt {
                provider_message_id: format!("mock_msg_{}", Uuid::now_v7().simple()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_runs_before_default() {
        let processor = MockPaymentProcessor::paying().with_script([
            Ok(ChargeOutcome::Declined {
                code: "card_declined".into(),
                message: None,
            }),
            Err(ProcessorError::Timeout),
        ]);

        assert!(matches!(
            processor.retry_charge("inv_1").await,
            Ok(ChargeOutcome::Declined { .. })
        ));
        assert_eq!(
            processor.retry_charge("inv_1").await,
            Err(ProcessorError::Timeout)
        );
        assert_eq!(processor.retry_charge("inv_1").await, Ok(ChargeOutcome::Paid));
        assert_eq!(processor.calls().len(), 3);
    }

    #[tokio::test]
    async fn mock_delivery_issues_prefixed_ids() {
        let delivery = MockMessageDelivery::new();
        let receipt = delivery
            .send(&OutboundMessage {
                from: "billing@example.com".into(),
                to: "ada@example.com".into(),
                subject: "Hi".into(),
                html: "<p>Hi</p>".into(),
                text: "Hi".into(),
                tags: vec![],
            })
            .await
            .unwrap();
        assert!(receipt.provider_message_id.starts_with("mock_msg_"));
        assert_eq!(delivery.sent().len(), 1);
    }
}
