use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chart_insights_schemas::{HistoryRow, ScreenCapRequest};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::database::{Database, HISTORY_PAGE_SIZE};
use crate::error::AnalysisError;
use crate::extractor::InsightExtractor;
use crate::gateway::ModelGateway;
use crate::image_input::{image_content_hash, ChartImage};
use crate::validator::InsightValidator;

/// Response header carrying the validation outcome
pub const VALIDATION_HEADER: &str = "x-insight-validation";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub extractor: Arc<InsightExtractor>,
    pub validator: Arc<InsightValidator>,
}

impl AppState {
    pub fn new(db: Database, gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            db,
            extractor: Arc::new(InsightExtractor::new(gateway.clone())),
            validator: Arc::new(InsightValidator::new(gateway)),
        }
    }
}

/// Build the HTTP router
pub fn router(state: AppState, cors_origin: &str, max_upload_bytes: usize) -> Result<Router> {
    let origin: HeaderValue = cors_origin
        .parse()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;

    // Credentials rule out wildcards, so methods and headers are mirrored
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/analyze/upload", post(analyze_uploaded_graph))
        .route("/api/analyze/screencap", post(analyze_screen_capture))
        .route("/api/history", get(get_historical_data))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Graph Analysis AI API",
        "version": "1.0.0"
    }))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "analysis",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn analyze_uploaded_graph(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AnalysisError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AnalysisError::InvalidInput(format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(AnalysisError::InvalidInput(
                "File provided is not an image.".to_string(),
            ));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AnalysisError::InvalidInput(format!("Invalid upload: {}", e)))?;
        upload = Some(bytes);
        break;
    }

    let bytes = upload.ok_or_else(|| {
        AnalysisError::InvalidInput("Missing multipart field 'file'.".to_string())
    })?;

    info!(
        "Analyzing uploaded chart ({} bytes, sha256 {})",
        bytes.len(),
        image_content_hash(&bytes)
    );

    let image = ChartImage::decode(bytes.to_vec())?;
    run_analysis(&state, image).await
}

async fn analyze_screen_capture(
    State(state): State<AppState>,
    Json(request): Json<ScreenCapRequest>,
) -> Result<Response, AnalysisError> {
    info!("Analyzing screen capture ({} chars)", request.image_data.len());

    let image = ChartImage::from_data_url(&request.image_data)?;
    run_analysis(&state, image).await
}

/// Extraction pass, then validation pass against the history store.
/// Store calls check a connection out only for their own duration.
async fn run_analysis(state: &AppState, image: ChartImage) -> Result<Response, AnalysisError> {
    let initial = state.extractor.extract(&image).await?;

    debug!(
        "Initial analysis: {} ({} data points)",
        initial.chart_type,
        initial.extracted_data.len()
    );

    let validated = state.validator.validate(initial, &state.db).await?;

    info!("Returning insights ({})", validated.outcome);

    Ok((
        [(VALIDATION_HEADER, validated.outcome.as_str())],
        Json(validated.record),
    )
        .into_response())
}

async fn get_historical_data(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryRow>>, AnalysisError> {
    let rows = state
        .db
        .recent(HISTORY_PAGE_SIZE)
        .await
        .map_err(AnalysisError::Store)?;

    Ok(Json(rows))
}
