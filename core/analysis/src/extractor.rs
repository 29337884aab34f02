use chart_insights_schemas::InsightRecord;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::gateway::{ModelGateway, ResponseFormat};
use crate::image_input::ChartImage;

const EXTRACTION_PROMPT: &str = r#"
You are an expert data analyst. Analyze the provided chart image.
Respond in a valid JSON format with the following keys:
- "chart_type": (e.g., "Line Chart", "Bar Chart", "Pie Chart")
- "summary": A brief, one-sentence summary of the chart's main point.
- "trends": A list of key trends or patterns observed.
- "anomalies": A list of any outliers or unexpected data points.
- "recommendations": A list of 2-3 actionable business recommendations based ONLY on the data in this chart.
- "extracted_data": An array of JSON objects representing the data points. For example, [{"category": "Jan", "value": 150}, {"category": "Feb", "value": 170}].

Here is the chart:
"#;

/// First pass: chart image in, structured insights out
pub struct InsightExtractor {
    gateway: Arc<dyn ModelGateway>,
}

impl InsightExtractor {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Ask the model about the chart and return its raw text.
    /// Gateway failures are fatal for the request and are not retried.
    pub async fn analyze(&self, image: &ChartImage) -> Result<String, AnalysisError> {
        debug!(
            "Requesting insights for {}x{} {} chart",
            image.width, image.height, image.mime_type
        );

        let text = self
            .gateway
            .describe_image(EXTRACTION_PROMPT, image, ResponseFormat::Json)
            .await
            .map_err(AnalysisError::Gateway)?;

        info!("Received {} bytes of extraction output", text.len());
        Ok(text)
    }

    /// Analyze and parse in one step
    pub async fn extract(&self, image: &ChartImage) -> Result<InsightRecord, AnalysisError> {
        let raw = self.analyze(image).await?;
        parse_insights(&raw)
    }
}

/// Parse model output as an insight record.
///
/// Tolerates a Markdown code fence or prose around the outermost JSON object.
pub fn parse_insights(raw: &str) -> Result<InsightRecord, AnalysisError> {
    serde_json::from_str(json_block(raw))
        .map_err(|e| AnalysisError::UnparsableResponse(e.to_string()))
}

/// Slice from the first `{` to the last `}`, or the whole text if there is none
pub(crate) fn json_block(response: &str) -> &str {
    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => response,
    }
}
