use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};

use payrecover_infra::store::{CampaignStore, RecoveryStats};

use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Json<RecoveryStats>, ApiError> {
    Ok(Json(services.store.stats().await?))
}
