//! Main entry point for the vision-language model server

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vlm_serving::{api, config::Settings, inference::HttpVisionModel, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let json = settings.logging.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();

    info!("Starting vision-language model server");
    info!(
        model = %settings.model.name,
        endpoint = %settings.model.endpoint,
        "Using model worker"
    );
    info!(
        preprocess_workers = settings.preprocess.workers,
        max_pending = settings.preprocess.max_pending,
        gate_timeout_ms = settings.gate.acquire_timeout_ms,
        batch_enabled = settings.batch.enabled,
        "Loaded configuration"
    );
    if settings.auth.enabled() {
        info!("API key authentication enabled (X-Moondream-Auth)");
    } else {
        warn!("No API key set, X-Moondream-Auth header is optional");
    }

    let model = HttpVisionModel::new(&settings.model)?;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState::new(settings, Box::new(model)));
    let app = api::create_router(app_state.clone());

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let service = &app_state.service;
    info!(
        pool = ?service.pool().stats(),
        inferences_completed = service.gate().completed_count(),
        inferences_failed = service.gate().failed_count(),
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
