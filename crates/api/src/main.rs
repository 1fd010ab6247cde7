use anyhow::Context;

use payrecover_api::app::{build_app, services::AppServices};
use payrecover_infra::{EngineConfig, RecoveryRuntime};
use payrecover_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_format = match std::env::var("PAYRECOVER_LOG_FORMAT") {
        Ok(value) => value.parse::<LogFormat>()?,
        Err(_) => LogFormat::default(),
    };
    payrecover_observability::init(log_format);

    let config = EngineConfig::from_env().context("loading configuration")?;
    let bind = std::env::var("PAYRECOVER_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let runtime = RecoveryRuntime::start(&config)
        .await
        .context("starting recovery engine")?;
    let app = build_app(AppServices::from_runtime(&runtime));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}
