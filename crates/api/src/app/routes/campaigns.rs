use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use payrecover_core::CampaignId;
use payrecover_infra::store::{CampaignDetail, CampaignStore};
use payrecover_infra::CampaignCommand;

use crate::app::dto::{CampaignPage, CommandResponse, ListCampaignsQuery, SendMessageRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_campaigns))
        .route("/:id", get(get_campaign))
        .route("/:id/retry", post(retry_campaign))
        .route("/:id/messages", post(send_message))
        .route("/:id/cancel", post(cancel_campaign))
}

fn parse_id(id: &str) -> Result<CampaignId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid campaign id: {id}")))
}

pub async fn list_campaigns(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignPage>, ApiError> {
    let filter = query.into_filter()?;
    let campaigns = services.store.list(&filter).await?;
    Ok(Json(CampaignPage {
        campaigns,
        limit: filter.clamped_limit(),
        offset: filter.offset,
    }))
}

pub async fn get_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<CampaignDetail>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(services.store.detail(id).await?))
}

pub async fn retry_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let campaign_id = parse_id(&id)?;
    run(&services, CampaignCommand::Retry { campaign_id }).await
}

pub async fn send_message(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<SendMessageRequest>>,
) -> Result<Json<CommandResponse>, ApiError> {
    let campaign_id = parse_id(&id)?;
    let body = body.map(|Json(body)| body).unwrap_or_default();
    run(
        &services,
        CampaignCommand::SendStep {
            campaign_id,
            step_number: body.step_number,
        },
    )
    .await
}

pub async fn cancel_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse>, ApiError> {
    let campaign_id = parse_id(&id)?;
    run(&services, CampaignCommand::Cancel { campaign_id }).await
}

/// Control commands run inline so the caller sees the result.
async fn run(services: &AppServices, command: CampaignCommand) -> Result<Json<CommandResponse>, ApiError> {
    let outcome = services.engine.dispatch(command, Utc::now()).await?;
    Ok(Json(CommandResponse::from_outcome(outcome)?))
}
