//! Engine configuration.
//!
//! Built once at startup and handed to the engine by value; nothing reads
//! the environment after that.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

use payrecover_campaigns::{DEFAULT_MAX_RETRIES, DunningSequence, RetryPolicy};
use payrecover_content::AiSettings;

use crate::external::{ResendSettings, StripeSettings};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How retries reach the processor.
#[derive(Debug, Clone)]
pub enum ProcessorMode {
    /// Scripted processor; `None` pays every invoice, `Some(code)` declines with `code`.
    Mock { decline_code: Option<String> },
    Stripe(StripeSettings),
}

#[derive(Debug, Clone)]
pub enum ContentMode {
    Template,
    Ai(AiSettings),
}

#[derive(Debug, Clone)]
pub enum DeliveryMode {
    Mock,
    Resend(ResendSettings),
}

/// Everything the recovery engine needs to run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub processor: ProcessorMode,
    pub content: ContentMode,
    pub delivery: DeliveryMode,

    pub webhook_secret: String,
    pub signature_tolerance: chrono::Duration,
    pub dedup_ttl: chrono::Duration,

    pub max_retries: u32,
    pub utc_offset: FixedOffset,
    pub sequence: DunningSequence,

    pub processor_timeout: Duration,
    pub content_timeout: Duration,
    pub delivery_timeout: Duration,
    pub store_timeout: Duration,
    /// How long a worker may hold a campaign before the claim lapses.
    pub lease_ttl: chrono::Duration,

    pub scan_interval: Duration,
    pub scan_batch_size: usize,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,

    pub business_name: String,
    pub from_address: String,
    /// Link rendered as the email call-to-action; `{invoice}` is replaced.
    pub payment_update_url: Option<String>,

    /// Selects the PostgreSQL store when present.
    pub database_url: Option<String>,
}

impl EngineConfig {
    /// Defaults with mock collaborators and the given webhook secret.
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            processor: ProcessorMode::Mock {
                decline_code: Some("insufficient_funds".to_string()),
            },
            content: ContentMode::Template,
            delivery: DeliveryMode::Mock,
            webhook_secret: webhook_secret.into(),
            signature_tolerance: chrono::Duration::seconds(300),
            dedup_ttl: chrono::Duration::hours(72),
            max_retries: DEFAULT_MAX_RETRIES,
            utc_offset: Utc.fix(),
            sequence: DunningSequence::default(),
            processor_timeout: Duration::from_secs(15),
            content_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            lease_ttl: chrono::Duration::minutes(2),
            scan_interval: Duration::from_secs(60),
            scan_batch_size: 100,
            worker_concurrency: 8,
            queue_capacity: 1024,
            business_name: "Our Team".to_string(),
            from_address: "billing@example.com".to_string(),
            payment_update_url: None,
            database_url: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `PAYRECOVER_*` settings through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secret = get("PAYRECOVER_WEBHOOK_SECRET")
            .ok_or(ConfigError::Missing("PAYRECOVER_WEBHOOK_SECRET"))?;
        let mut cfg = Self::new(secret);

        cfg.processor = match get("PAYRECOVER_PROCESSOR").as_deref().unwrap_or("mock") {
            "mock" => ProcessorMode::Mock {
                decline_code: match get("PAYRECOVER_MOCK_OUTCOME").as_deref() {
                    None => Some("insufficient_funds".to_string()),
                    Some("paid") => None,
                    Some(code) => Some(code.to_string()),
                },
            },
            "stripe" => {
                let key = get("PAYRECOVER_STRIPE_API_KEY")
                    .ok_or(ConfigError::Missing("PAYRECOVER_STRIPE_API_KEY"))?;
                let mut settings = StripeSettings::new(key);
                if let Some(url) = get("PAYRECOVER_STRIPE_BASE_URL") {
                    settings.base_url = url;
                }
                ProcessorMode::Stripe(settings)
            }
            other => return Err(invalid("PAYRECOVER_PROCESSOR", other, "expected mock or stripe")),
        };

        cfg.content = match get("PAYRECOVER_CONTENT").as_deref().unwrap_or("template") {
            "template" => ContentMode::Template,
            "ai" => {
                let key = get("PAYRECOVER_AI_API_KEY")
                    .ok_or(ConfigError::Missing("PAYRECOVER_AI_API_KEY"))?;
                let mut settings = AiSettings::new(key);
                if let Some(url) = get("PAYRECOVER_AI_BASE_URL") {
                    settings.base_url = url;
                }
                if let Some(model) = get("PAYRECOVER_AI_MODEL") {
                    settings.model = model;
                }
                ContentMode::Ai(settings)
            }
            other => return Err(invalid("PAYRECOVER_CONTENT", other, "expected template or ai")),
        };

        cfg.delivery = match get("PAYRECOVER_DELIVERY").as_deref().unwrap_or("mock") {
            "mock" => DeliveryMode::Mock,
            "resend" => {
                let key = get("PAYRECOVER_RESEND_API_KEY")
                    .ok_or(ConfigError::Missing("PAYRECOVER_RESEND_API_KEY"))?;
                let mut settings = ResendSettings::new(key);
                if let Some(url) = get("PAYRECOVER_RESEND_BASE_URL") {
                    settings.base_url = url;
                }
                DeliveryMode::Resend(settings)
            }
            other => return Err(invalid("PAYRECOVER_DELIVERY", other, "expected mock or resend")),
        };

        if let Some(secs) = parse::<i64>(&get, "PAYRECOVER_SIGNATURE_TOLERANCE_SECS")? {
            cfg.signature_tolerance = chrono::Duration::seconds(secs);
        }
        if let Some(hours) = parse::<i64>(&get, "PAYRECOVER_DEDUP_TTL_HOURS")? {
            cfg.dedup_ttl = chrono::Duration::hours(hours);
        }
        if let Some(max) = parse::<u32>(&get, "PAYRECOVER_MAX_RETRIES")? {
            cfg.max_retries = max;
        }
        if let Some(minutes) = parse::<i32>(&get, "PAYRECOVER_UTC_OFFSET_MINUTES")? {
            cfg.utc_offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                invalid(
                    "PAYRECOVER_UTC_OFFSET_MINUTES",
                    &minutes.to_string(),
                    "offset out of range",
                )
            })?;
        }

        if let Some(ms) = parse::<u64>(&get, "PAYRECOVER_PROCESSOR_TIMEOUT_MS")? {
            cfg.processor_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "PAYRECOVER_CONTENT_TIMEOUT_MS")? {
            cfg.content_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "PAYRECOVER_DELIVERY_TIMEOUT_MS")? {
            cfg.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&get, "PAYRECOVER_STORE_TIMEOUT_MS")? {
            cfg.store_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<i64>(&get, "PAYRECOVER_LEASE_SECS")? {
            cfg.lease_ttl = chrono::Duration::seconds(secs);
        }

        if let Some(secs) = parse::<u64>(&get, "PAYRECOVER_SCAN_INTERVAL_SECS")? {
            cfg.scan_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse::<usize>(&get, "PAYRECOVER_SCAN_BATCH_SIZE")? {
            cfg.scan_batch_size = n;
        }
        if let Some(n) = parse::<usize>(&get, "PAYRECOVER_WORKER_CONCURRENCY")? {
            cfg.worker_concurrency = n;
        }
        if let Some(n) = parse::<usize>(&get, "PAYRECOVER_QUEUE_CAPACITY")? {
            cfg.queue_capacity = n;
        }

        if let Some(name) = get("PAYRECOVER_BUSINESS_NAME") {
            cfg.business_name = name;
        }
        if let Some(from) = get("PAYRECOVER_FROM_ADDRESS") {
            cfg.from_address = from;
        }
        cfg.payment_update_url = get("PAYRECOVER_PAYMENT_UPDATE_URL");
        cfg.database_url = get("DATABASE_URL");

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signature_tolerance <= chrono::Duration::zero() {
            return Err(invalid(
                "PAYRECOVER_SIGNATURE_TOLERANCE_SECS",
                &self.signature_tolerance.num_seconds().to_string(),
                "must be positive",
            ));
        }
        if self.lease_ttl <= chrono::Duration::zero() {
            return Err(invalid(
                "PAYRECOVER_LEASE_SECS",
                &self.lease_ttl.num_seconds().to_string(),
                "must be positive",
            ));
        }
        let call_budget = self.processor_timeout.max(self.content_timeout + self.delivery_timeout);
        if self.lease_ttl.to_std().map_or(true, |lease| lease <= call_budget) {
            return Err(invalid(
                "PAYRECOVER_LEASE_SECS",
                &self.lease_ttl.num_seconds().to_string(),
                "must outlast the processor, content and delivery timeouts",
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(invalid("PAYRECOVER_SCAN_INTERVAL_SECS", "0", "must be positive"));
        }
        for (key, value) in [
            ("PAYRECOVER_SCAN_BATCH_SIZE", self.scan_batch_size),
            ("PAYRECOVER_WORKER_CONCURRENCY", self.worker_concurrency),
            ("PAYRECOVER_QUEUE_CAPACITY", self.queue_capacity),
        ] {
            if value == 0 {
                return Err(invalid(key, "0", "must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.utc_offset)
    }

    /// Call-to-action link for one invoice.
    pub fn payment_link(&self, invoice_ref: &str) -> Option<String> {
        self.payment_update_url
            .as_ref()
            .map(|url| url.replace("{invoice}", invoice_ref))
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid(key, &raw, &e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn webhook_secret_is_required() {
        let err = EngineConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("PAYRECOVER_WEBHOOK_SECRET"));
    }

    #[test]
    fn defaults_use_mock_collaborators() {
        let cfg = EngineConfig::from_lookup(lookup(&[("PAYRECOVER_WEBHOOK_SECRET", "whsec")])).unwrap();
        assert!(matches!(cfg.processor, ProcessorMode::Mock { .. }));
        assert!(matches!(cfg.content, ContentMode::Template));
        assert!(matches!(cfg.delivery, DeliveryMode::Mock));
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.signature_tolerance, chrono::Duration::seconds(300));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn real_collaborators_need_keys() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("PAYRECOVER_WEBHOOK_SECRET", "whsec"),
            ("PAYRECOVER_PROCESSOR", "stripe"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("PAYRECOVER_STRIPE_API_KEY"));
    }

    #[test]
    fn invalid_numbers_are_reported_not_defaulted() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("PAYRECOVER_WEBHOOK_SECRET", "whsec"),
            ("PAYRECOVER_MAX_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYRECOVER_MAX_RETRIES", .. }));
    }

    #[test]
    fn local_offset_and_payment_link() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("PAYRECOVER_WEBHOOK_SECRET", "whsec"),
            ("PAYRECOVER_UTC_OFFSET_MINUTES", "120"),
            ("PAYRECOVER_PAYMENT_UPDATE_URL", "https://pay.example.com/update?invoice={invoice}"),
        ]))
        .unwrap();
        assert_eq!(cfg.utc_offset.local_minus_utc(), 7200);
        assert_eq!(
            cfg.payment_link("in_42").as_deref(),
            Some("https://pay.example.com/update?invoice=in_42")
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("PAYRECOVER_WEBHOOK_SECRET", "whsec"),
            ("PAYRECOVER_WORKER_CONCURRENCY", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYRECOVER_WORKER_CONCURRENCY", .. }));
    }

    #[test]
    fn lease_must_outlast_outbound_calls() {
        let err = EngineConfig::from_lookup(lookup(&[
            ("PAYRECOVER_WEBHOOK_SECRET", "whsec"),
            ("PAYRECOVER_LEASE_SECS", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PAYRECOVER_LEASE_SECS", .. }));
    }
}
