use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Not JSON, or not one of the known event kinds.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Well-formed but semantically invalid.
    #[error("invalid event: {0}")]
    Invalid(String),
}

impl From<payrecover_core::DomainError> for EventError {
    fn from(err: payrecover_core::DomainError) -> Self {
        EventError::Invalid(err.to_string())
    }
}
