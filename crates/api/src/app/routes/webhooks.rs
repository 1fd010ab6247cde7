use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use payrecover_events::SIGNATURE_HEADER;

use crate::app::dto::WebhookReceipt;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/payments", post(receive_payment_event))
}

/// Applies a signed payment event and queues its follow-up work.
///
/// Duplicates answer 200 so the sender stops redelivering.
pub async fn receive_payment_event(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = services.gateway.ingest(signature, &body, Utc::now()).await?;
    for command in &outcome.commands {
        services.queue.submit(*command);
    }

    Ok(Json(WebhookReceipt {
        received: true,
        duplicate: outcome.duplicate,
        event_id: outcome.event_id,
        event_type: outcome.event_type,
    }))
}
