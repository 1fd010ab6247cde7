//! Dunning sequence definition: which message step is due when.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use payrecover_core::{DomainError, DomainResult};

/// Step number reserved for the win-back message in the default sequence.
pub const WIN_BACK_STEP: u32 = 5;

/// One message step.
///
/// `subject` / `body_html` override the built-in per-step template when set
/// and may use the `{{name}}`, `{{amount}}`, `{{currency}}` and `{{business}}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningStep {
    pub step_number: u32,
    /// Hours after campaign creation at which the step becomes due.
    pub delay_hours: u32,
    pub subject: Option<String>,
    pub body_html: Option<String>,
}

impl DunningStep {
    pub fn new(step_number: u32, delay_hours: u32) -> Self {
        Self {
            step_number,
            delay_hours,
            subject: None,
            body_html: None,
        }
    }

    pub fn with_template(mut self, subject: impl Into<String>, body_html: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self.body_html = Some(body_html.into());
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::hours(i64::from(self.delay_hours))
    }
}

/// Ordered message steps for active campaigns, plus an optional win-back step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DunningSequence {
    steps: Vec<DunningStep>,
    win_back: Option<DunningStep>,
}

impl Default for DunningSequence {
    fn default() -> Self {
        Self {
            steps: vec![
                DunningStep::new(1, 4),
                DunningStep::new(2, 24),
                DunningStep::new(3, 72),
                DunningStep::new(4, 120),
            ],
            win_back: Some(DunningStep::new(WIN_BACK_STEP, 0)),
        }
    }
}

impl DunningSequence {
    /// Builds a sequence, checking that steps are numbered `1..=n` with
    /// non-decreasing delays and that the win-back step comes after them.
    pub fn new(steps: Vec<DunningStep>, win_back: Option<DunningStep>) -> DomainResult<Self> {
        if steps.is_empty() {
            return Err(DomainError::validation("a sequence needs at least one step"));
        }
        for (idx, step) in steps.iter().enumerate() {
            if step.step_number as usize != idx + 1 {
                return Err(DomainError::validation(format!(
                    "steps must be numbered 1..=n, found {} at position {}",
                    step.step_number,
                    idx + 1
                )));
            }
        }
        if steps.windows(2).any(|w| w[1].delay_hours < w[0].delay_hours) {
            return Err(DomainError::validation("step delays must not decrease"));
        }
        if let Some(wb) = &win_back {
            if wb.step_number as usize <= steps.len() {
                return Err(DomainError::validation(
                    "win-back step must come after the regular steps",
                ));
            }
        }
        Ok(Self { steps, win_back })
    }

    pub fn steps(&self) -> &[DunningStep] {
        &self.steps
    }

    pub fn win_back(&self) -> Option<&DunningStep> {
        self.win_back.as_ref()
    }

    pub fn last_step_number(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Looks up a step, regular or win-back.
    pub fn step(&self, step_number: u32) -> Option<&DunningStep> {
        self.steps
            .iter()
            .find(|s| s.step_number == step_number)
            .or_else(|| self.win_back.as_ref().filter(|wb| wb.step_number == step_number))
    }

    pub fn is_win_back(&self, step_number: u32) -> bool {
        self.win_back
            .as_ref()
            .is_some_and(|wb| wb.step_number == step_number)
    }

    /// The regular step following `last_sent` (0 when nothing was sent yet).
    pub fn next_step(&self, last_sent: u32) -> Option<&DunningStep> {
        self.steps.get(last_sent as usize)
    }

    /// When the step after `last_sent` becomes due, if there is one.
    pub fn next_due_at(&self, last_sent: u32, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_step(last_sent).map(|s| created_at + s.delay())
    }

    /// Whether `step_number` is the next regular step and its delay has elapsed.
    pub fn is_due(
        &self,
        step_number: u32,
        last_sent: u32,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.next_step(last_sent)
            .is_some_and(|s| s.step_number == step_number && created_at + s.delay() <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn default_sequence_has_four_steps_and_win_back() {
        let seq = DunningSequence::default();
        assert_eq!(seq.last_step_number(), 4);
        assert!(seq.is_win_back(WIN_BACK_STEP));
        assert_eq!(seq.step(WIN_BACK_STEP).map(|s| s.step_number), Some(5));
        assert!(seq.step(6).is_none());
    }

    #[test]
    fn steps_become_due_in_order() {
        let seq = DunningSequence::default();
        let now = created() + Duration::hours(30);
        assert!(seq.is_due(1, 0, created(), now));
        assert!(!seq.is_due(2, 0, created(), now));
        assert!(seq.is_due(2, 1, created(), now));
        assert!(!seq.is_due(3, 2, created(), now));
        assert_eq!(
            seq.next_due_at(2, created()),
            Some(created() + Duration::hours(72))
        );
        assert_eq!(seq.next_due_at(4, created()), None);
    }

    #[test]
    fn rejects_gaps_and_decreasing_delays() {
        assert!(DunningSequence::new(vec![DunningStep::new(2, 1)], None).is_err());
        assert!(
            DunningSequence::new(vec![DunningStep::new(1, 10), DunningStep::new(2, 5)], None)
                .is_err()
        );
        assert!(
            DunningSequence::new(vec![DunningStep::new(1, 0)], Some(DunningStep::new(1, 0)))
                .is_err()
        );
        assert!(DunningSequence::new(vec![], None).is_err());
    }

    #[test]
    fn custom_templates_are_kept_on_the_step() {
        let seq = DunningSequence::new(
            vec![DunningStep::new(1, 0).with_template("Hi {{name}}", "<p>{{amount}}</p>")],
            None,
        )
        .unwrap();
        assert_eq!(seq.step(1).and_then(|s| s.subject.as_deref()), Some("Hi {{name}}"));
        assert!(seq.win_back().is_none());
    }
}
