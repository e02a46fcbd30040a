// Main entry point for the Arabic image translation service

use arabic_translator::{build_router, AppState, Config, Metrics, PipelineOrchestrator};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    let filter = EnvFilter::new(format!(
        "arabic_translator={},tower_http=warn",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== ARABIC IMAGE TRANSLATOR ===");
    info!(
        "Config: max file {} MB, max images {}, threshold {}, {} -> {}",
        config.max_file_size() / (1024 * 1024),
        config.max_batch_size(),
        config.confidence_threshold(),
        config.source_language(),
        config.target_language()
    );

    // Initialize metrics
    let metrics = Metrics::new();

    info!("Initializing pipeline...");
    let orchestrator = Arc::new(PipelineOrchestrator::from_config(config.clone(), metrics.clone())?);
    let app = build_router(AppState::new(config.clone(), orchestrator, metrics));

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /         - Service description");
    info!("  GET  /health   - Component readiness");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /upload   - Translate a file (multipart field 'file')");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
