use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use payrecover_infra::{RecoveryError, StoreError};

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Recovery(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Recovery(err) => match err {
                RecoveryError::Authentication(_) | RecoveryError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                RecoveryError::NotFound(_) => StatusCode::NOT_FOUND,
                RecoveryError::AlreadyTerminal(_)
                | RecoveryError::VersionConflict(_)
                | RecoveryError::Busy(_) => StatusCode::CONFLICT,
                RecoveryError::PermanentDecline { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RecoveryError::TransientProcessor(_) | RecoveryError::DeliveryFailure(_) => {
                    StatusCode::BAD_GATEWAY
                }
                RecoveryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RecoveryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Recovery(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
        json_error(status, self.code(), self.to_string())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
