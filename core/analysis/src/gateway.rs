//! Model Gateway: the hosted generative model used for both passes.
//!
//! The gateway is created once at startup and injected into the extractor
//! and validator as `Arc<dyn ModelGateway>`, so tests can swap in a fake.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GatewayConfig;
use crate::image_input::ChartImage;

/// Shape the model is asked to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Structured output only (`application/json`)
    Json,
    /// Free text
    Text,
}

/// Text generation interface for the extraction and validation passes
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Prompt plus chart image, answered by the vision model
    async fn describe_image(
        &self,
        prompt: &str,
        image: &ChartImage,
        format: ResponseFormat,
    ) -> Result<String>;

    /// Text-only prompt, answered by the text model
    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String>;
}

/// Google Gemini over the public REST API
pub struct GeminiGateway {
    config: GatewayConfig,
    client: Client,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self { config, client })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{}", trimmed)
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    async fn generate(
        &self,
        model: &str,
        parts: Vec<Value>,
        format: ResponseFormat,
    ) -> Result<String> {
        let url = self.endpoint_for_model(model);
        let request_body = request_body(parts, format);

        debug!("Calling Gemini at {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .context("Failed to call Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, error_text);
        }

        let payload: Value = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        response_text(&payload)
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn describe_image(
        &self,
        prompt: &str,
        image: &ChartImage,
        format: ResponseFormat,
    ) -> Result<String> {
        let parts = vec![
            json!({ "text": prompt }),
            json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.to_base64(),
                }
            }),
        ];

        self.generate(&self.config.vision_model, parts, format).await
    }

    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        self.generate(&self.config.text_model, vec![json!({ "text": prompt })], format)
            .await
    }
}

fn request_body(parts: Vec<Value>, format: ResponseFormat) -> Value {
    let mut body = json!({ "contents": [{ "role": "user", "parts": parts }] });
    if format == ResponseFormat::Json {
        body["generationConfig"] = json!({ "responseMimeType": "application/json" });
    }
    body
}

/// Concatenated text parts of the first candidate
fn response_text(payload: &Value) -> Result<String> {
    let candidate = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .ok_or_else(|| {
            let reason = payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            anyhow!("Gemini returned no response ({})", reason)
        })?;

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN");
        anyhow::bail!("Gemini response has no text (finish reason: {})", reason);
    }

    Ok(text)
}
