pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod image_input;
pub mod validator;

#[cfg(test)]
mod testing;

pub use api::{router, AppState, VALIDATION_HEADER};
pub use config::{AppConfig, GatewayConfig};
pub use database::{Database, HistorySession, HistoryStore, HISTORY_PAGE_SIZE};
pub use error::AnalysisError;
pub use extractor::{parse_insights, InsightExtractor};
pub use gateway::{GeminiGateway, ModelGateway, ResponseFormat};
pub use image_input::{image_content_hash, ChartImage};
pub use validator::{InsightValidator, ValidatedInsights, DEFAULT_METRIC_NAME};
