use thiserror::Error;

use payrecover_campaigns::FailureClassification;
use payrecover_core::DomainError;
use payrecover_events::{EventError, SignatureError};

use crate::external::{DeliveryError, ProcessorError};
use crate::store::StoreError;

/// Engine-level error taxonomy.
///
/// `AlreadyTerminal`, `NotFound` and `Busy` are benign: callers log them at
/// `warn` and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] SignatureError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("processor unavailable: {0}")]
    TransientProcessor(String),

    #[error("permanent decline ({classification}): {detail}")]
    PermanentDecline {
        classification: FailureClassification,
        detail: String,
    },

    #[error("campaign is already {0}")]
    AlreadyTerminal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("campaign is busy: {0}")]
    Busy(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl RecoveryError {
    /// Outcomes that mean "nothing to do" rather than "something broke".
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            RecoveryError::AlreadyTerminal(_) | RecoveryError::NotFound(_) | RecoveryError::Busy(_)
        )
    }

    /// Stable machine-readable code for API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RecoveryError::Authentication(_) => "authentication_failed",
            RecoveryError::Validation(_) => "validation_failed",
            RecoveryError::TransientProcessor(_) => "processor_unavailable",
            RecoveryError::PermanentDecline { .. } => "permanent_decline",
            RecoveryError::AlreadyTerminal(_) => "already_terminal",
            RecoveryError::NotFound(_) => "not_found",
            RecoveryError::DeliveryFailure(_) => "delivery_failed",
            RecoveryError::VersionConflict(_) => "version_conflict",
            RecoveryError::Busy(_) => "busy",
            RecoveryError::Store(_) => "store_error",
            RecoveryError::Timeout(_) => "timeout",
        }
    }
}

impl From<StoreError> for RecoveryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => RecoveryError::NotFound(what),
            StoreError::VersionConflict { .. } => RecoveryError::VersionConflict(err.to_string()),
            StoreError::DuplicateStep { .. } | StoreError::Rejected(_) => {
                RecoveryError::Validation(err.to_string())
            }
            StoreError::Terminal(status) => RecoveryError::AlreadyTerminal(status),
            StoreError::Timeout(msg) => RecoveryError::Timeout(msg),
            StoreError::Backend(msg) => RecoveryError::Store(msg),
        }
    }
}

impl From<DomainError> for RecoveryError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::AlreadyTerminal(status) => RecoveryError::AlreadyTerminal(status),
            DomainError::Conflict(msg) => RecoveryError::VersionConflict(msg),
            other => RecoveryError::Validation(other.to_string()),
        }
    }
}

impl From<EventError> for RecoveryError {
    fn from(err: EventError) -> Self {
        RecoveryError::Validation(err.to_string())
    }
}

impl From<ProcessorError> for RecoveryError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Timeout => RecoveryError::TransientProcessor("processor_timeout".into()),
            other => RecoveryError::TransientProcessor(other.to_string()),
        }
    }
}

impl From<DeliveryError> for RecoveryError {
    fn from(err: DeliveryError) -> Self {
        RecoveryError::DeliveryFailure(err.to_string())
    }
}
