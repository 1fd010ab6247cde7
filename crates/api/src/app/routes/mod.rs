use axum::{routing::get, Router};

pub mod campaigns;
pub mod system;
pub mod webhooks;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/stats", get(system::stats))
        .nest("/webhooks", webhooks::router())
        .nest("/campaigns", campaigns::router())
}
