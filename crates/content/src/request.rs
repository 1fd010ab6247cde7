use serde::{Deserialize, Serialize};

use payrecover_core::Money;

/// Lowest step with a built-in template.
pub const MIN_STEP: u32 = 1;
/// Highest step with a built-in template (the win-back message).
pub const MAX_STEP: u32 = 5;

/// Voice of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Friendly,
    Professional,
    Urgent,
    WinBack,
}

impl Tone {
    /// Default tone for a (clamped) step: 1-2 friendly, 3-4 urgent, 5 win-back.
    pub fn for_step(step_number: u32) -> Self {
        match clamp_step(step_number) {
            1 | 2 => Self::Friendly,
            3 | 4 => Self::Urgent,
            _ => Self::WinBack,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Professional => "professional",
            Self::Urgent => "urgent",
            Self::WinBack => "win_back",
        }
    }
}

pub(crate) fn clamp_step(step_number: u32) -> u32 {
    step_number.clamp(MIN_STEP, MAX_STEP)
}

/// Operator-supplied subject/body with `{{placeholder}}` markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub body_html: String,
}

/// Everything needed to write one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRequest {
    pub step_number: u32,
    pub amount: Money,
    pub customer_name: Option<String>,
    pub business_name: Option<String>,
    pub tone: Option<Tone>,
    /// Takes precedence over both the AI path and the built-in templates.
    pub template: Option<MessageTemplate>,
}

impl ContentRequest {
    pub fn new(step_number: u32, amount: Money) -> Self {
        Self {
            step_number,
            amount,
            customer_name: None,
            business_name: None,
            tone: None,
            template: None,
        }
    }

    pub fn with_customer_name(mut self, name: Option<String>) -> Self {
        self.customer_name = name;
        self
    }

    pub fn with_business_name(mut self, name: Option<String>) -> Self {
        self.business_name = name;
        self
    }

    pub fn with_tone(mut self, tone: Option<Tone>) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_template(mut self, template: Option<MessageTemplate>) -> Self {
        self.template = template;
        self
    }

    /// Step number clamped into `MIN_STEP..=MAX_STEP`.
    pub fn step(&self) -> u32 {
        clamp_step(self.step_number)
    }

    pub fn tone(&self) -> Tone {
        self.tone.unwrap_or_else(|| Tone::for_step(self.step_number))
    }
}
