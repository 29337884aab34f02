use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_DATABASE_URL: &str = "graph_analysis.db";

/// Credentials and endpoints for the hosted model
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub api_base: String,
    pub vision_model: String,
    pub text_model: String,
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            vision_model: DEFAULT_MODEL.to_string(),
            text_model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
        }
    }

    /// Read gateway settings; a missing API key is fatal
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;

        let api_base = non_empty_env("GEMINI_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let timeout_secs = match non_empty_env("GEMINI_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("GEMINI_TIMEOUT_SECS is not a number: {}", raw))?,
            None => 120,
        };

        Ok(Self {
            api_key,
            api_base,
            vision_model: non_empty_env("GEMINI_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            text_model: non_empty_env("GEMINI_TEXT_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub database_path: String,
    pub db_pool_size: u32,
    pub bind_addr: String,
    pub cors_origin: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let gateway = GatewayConfig::from_env()?;

        let database_url = non_empty_env("DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            gateway,
            database_path: sqlite_path(&database_url),
            db_pool_size: parse_env("DB_POOL_SIZE", 8)?,
            bind_addr: non_empty_env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            cors_origin: non_empty_env("CORS_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        })
    }
}

/// Strip a `sqlite://` / `sqlite:` scheme so the rest is a file path
pub fn sqlite_path(database_url: &str) -> String {
    let trimmed = database_url.trim();
    trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed)
        .to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_env(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
