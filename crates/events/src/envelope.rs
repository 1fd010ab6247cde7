use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::EventError;
use crate::event::{PaymentEvent, from_unix};

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    created: i64,
    #[serde(flatten)]
    payload: PaymentEvent,
}

/// A verified, parsed and validated inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    event_id: String,
    occurred_at: DateTime<Utc>,
    payload: PaymentEvent,
}

impl InboundEvent {
    pub fn new(event_id: impl Into<String>, occurred_at: DateTime<Utc>, payload: PaymentEvent) -> Self {
        Self {
            event_id: event_id.into(),
            occurred_at,
            payload,
        }
    }

    /// Parses `{"id", "created", "type", "data"}` and validates the payload.
    pub fn parse(body: &[u8]) -> Result<Self, EventError> {
        let raw: RawEvent =
            serde_json::from_slice(body).map_err(|e| EventError::Malformed(e.to_string()))?;
        if raw.id.trim().is_empty() {
            return Err(EventError::Invalid("event id must not be empty".into()));
        }
        raw.payload.validate()?;
        Ok(Self {
            event_id: raw.id,
            occurred_at: from_unix(raw.created)?,
            payload: raw.payload,
        })
    }

    /// Upstream event identifier, used for deduplication.
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &PaymentEvent {
        &self.payload
    }

    pub fn into_payload(self) -> PaymentEvent {
        self.payload
    }
}
