use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::processor::{ChargeOutcome, PaymentProcessor, ProcessorError};

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl StripeSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Retries invoices through the `POST /v1/invoices/{id}/pay` endpoint.
pub struct HttpPaymentProcessor {
    client: reqwest::Client,
    settings: StripeSettings,
}

impl HttpPaymentProcessor {
    pub fn new(settings: StripeSettings) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;
        Ok(Self { client, settings })
    }
}

#[derive(Debug, Deserialize)]
struct InvoiceBody {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

/// Interprets a pay-invoice response.
///
/// Card errors are declines; 429 and 5xx are the processor being unavailable;
/// any other non-success status is a rejected request.
pub(crate) fn interpret(status: u16, body: &str) -> Result<ChargeOutcome, ProcessorError> {
    if (200..300).contains(&status) {
        let invoice: InvoiceBody = serde_json::from_str(body)
            .map_err(|e| ProcessorError::Unavailable(format!("unreadable invoice body: {e}")))?;
        return match invoice.status.as_deref() {
            Some("paid") => Ok(ChargeOutcome::Paid),
            other => Ok(ChargeOutcome::Declined {
                code: "processing_error".to_string(),
                message: Some(format!(
                    "invoice left in status {}",
                    other.unwrap_or("unknown")
                )),
            }),
        };
    }

    if status == 429 || status >= 500 {
        return Err(ProcessorError::Unavailable(format!("status {status}")));
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) if status == 402 || error.kind.as_deref() == Some("card_error") => {
            Ok(ChargeOutcome::Declined {
                code: error
                    .decline_code
                    .or(error.code)
                    .unwrap_or_else(|| "card_declined".to_string()),
                message: error.message,
            })
        }
        _ => Err(ProcessorError::Rejected {
            status,
            body: body.to_string(),
        }),
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn retry_charge(&self, invoice_ref: &str) -> Result<ChargeOutcome, ProcessorError> {
        let url = format!(
            "{}/v1/invoices/{}/pay",
            self.settings.base_url.trim_end_matches('/'),
            invoice_ref
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!(invoice_ref, status, "processor answered retry");
        interpret(status, &body)
    }
}
