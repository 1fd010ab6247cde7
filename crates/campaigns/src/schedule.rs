//! Retry timing policy.
//!
//! Pure and deterministic: the same `(attempt_number, classification, now)`
//! always yields the same instant, so the whole module is covered by property
//! tests rather than clock-dependent ones.

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::DEFAULT_MAX_RETRIES;
use crate::classification::FailureClassification;

/// Backoff per attempt number (1-based), clamped to the last entry.
pub const BACKOFF_HOURS: [i64; 5] = [4, 24, 72, 120, 168];

/// Local hours of day retries are snapped to.
pub const PREFERRED_HOURS: [u32; 3] = [10, 14, 17];

/// One planned retry in a preview schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRetry {
    pub attempt_number: u32,
    pub delay_hours: i64,
    pub scheduled_at: DateTime<Utc>,
}

/// Retry policy: backoff table, preferred hours, and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    local_offset: FixedOffset,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            local_offset: Utc.fix(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, local_offset: FixedOffset) -> Self {
        Self {
            max_retries,
            local_offset,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn local_offset(&self) -> FixedOffset {
        self.local_offset
    }

    /// Same policy with a campaign-specific retry budget.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Raw backoff for the given attempt number (0 and 1 share the first entry).
    pub fn backoff(attempt_number: u32) -> Duration {
        let idx = (attempt_number.saturating_sub(1) as usize).min(BACKOFF_HOURS.len() - 1);
        Duration::hours(BACKOFF_HOURS[idx])
    }

    /// When the next automatic retry should run, or `None` if there is none.
    ///
    /// `attempt_number` is the number of retries already performed. `None` is
    /// returned once the budget is spent or when the classification is durable.
    pub fn next_retry_at(
        &self,
        attempt_number: u32,
        classification: Option<FailureClassification>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if attempt_number >= self.max_retries {
            return None;
        }
        if classification.is_some_and(FailureClassification::is_durable) {
            return None;
        }

        let delay = Self::backoff(attempt_number);
        Some(self.snap(now, delay))
    }

    /// Full preview of planned retries starting from `from`, assuming every
    /// attempt fails transiently.
    pub fn schedule(&self, from: DateTime<Utc>) -> Vec<ScheduledRetry> {
        let mut out = Vec::with_capacity(self.max_retries as usize);
        let mut cursor = from;
        for performed in 0..self.max_retries {
            let Some(at) = self.next_retry_at(performed, None, cursor) else {
                break;
            };
            out.push(ScheduledRetry {
                attempt_number: performed + 1,
                delay_hours: Self::backoff(performed).num_hours(),
                scheduled_at: at,
            });
            cursor = at;
        }
        out
    }

    fn snap(&self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        let target = now + delay;
        let local = target.with_timezone(&self.local_offset);
        let hour = nearest_preferred_hour(local.hour());

        let snapped = local
            .with_hour(hour)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(target);

        // Never retry sooner than half the nominal backoff.
        if snapped < now + delay / 2 {
            snapped + Duration::days(1)
        } else {
            snapped
        }
    }
}

fn nearest_preferred_hour(hour: u32) -> u32 {
    PREFERRED_HOURS
        .iter()
        .copied()
        .min_by_key(|preferred| preferred.abs_diff(hour))
        .unwrap_or(PREFERRED_HOURS[0])
}
