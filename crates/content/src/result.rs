use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rendered message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub is_generated_by_ai: bool,
}

impl GeneratedContent {
    /// Subject and both bodies carry visible text.
    pub fn is_complete(&self) -> bool {
        !self.subject.trim().is_empty()
            && !self.body_html.trim().is_empty()
            && !self.body_text.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content generation is disabled")]
    Disabled,

    #[error("content generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ContentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ContentError::Timeout(Duration::ZERO);
        }
        ContentError::Transport(err.to_string())
    }
}
