use anyhow::Result;
use chart_insights_analysis::{router, AppConfig, AppState, Database, GeminiGateway, ModelGateway};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Chart Insights Analysis Service v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;

    // Initialize database
    let db = Database::new(&config.database_path, config.db_pool_size)?;

    let gateway: Arc<dyn ModelGateway> = Arc::new(GeminiGateway::new(config.gateway.clone())?);
    info!(
        "Model gateway ready (vision: {}, text: {})",
        config.gateway.vision_model, config.gateway.text_model
    );

    let state = AppState::new(db, gateway);
    let app = router(state, &config.cors_origin, config.max_upload_bytes)?;

    // Start server
    info!("Starting HTTP server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
