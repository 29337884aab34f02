use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Insight Schema
// ============================================================================

/// Structured result of analyzing one chart image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRecord {
    pub chart_type: String,
    pub summary: String,
    pub trends: Vec<String>,
    pub anomalies: Vec<String>,
    pub recommendations: Vec<String>,
    pub extracted_data: Vec<DataPoint>,
}

impl InsightRecord {
    /// Categories of every data point that carries a `category` key, in order
    pub fn categories(&self) -> Vec<String> {
        self.extracted_data
            .iter()
            .filter(|point| point.has_category())
            .map(|point| point.category().unwrap_or_default())
            .collect()
    }
}

/// A single extracted data point.
///
/// The model is asked for `{"category": ..., "value": ...}` but may add extra
/// keys, so the raw object is kept and echoed back untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPoint(pub Map<String, Value>);

impl DataPoint {
    pub fn new(category: impl Into<String>, value: f64) -> Self {
        let mut map = Map::new();
        map.insert("category".to_string(), Value::String(category.into()));
        map.insert("value".to_string(), Value::from(value));
        Self(map)
    }

    pub fn has_category(&self) -> bool {
        self.0.contains_key("category")
    }

    pub fn has_value(&self) -> bool {
        self.0.contains_key("value")
    }

    /// Category as text; numbers and booleans are rendered, null and
    /// containers yield `None`
    pub fn category(&self) -> Option<String> {
        match self.0.get("category")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Value as a float; numeric strings are accepted
    pub fn value(&self) -> Option<f64> {
        match self.0.get("value")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }
}

// ============================================================================
// Validation Outcome
// ============================================================================

/// How the second (cross-check) pass ended for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Cross-check against history succeeded and the refined record was used
    Validated,
    /// Nothing to validate against (no data, no categories or no history)
    Unvalidated,
    /// Cross-check was attempted but failed; the first-pass record was used
    ValidationFailed,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Validated => "validated",
            ValidationOutcome::Unvalidated => "unvalidated",
            ValidationOutcome::ValidationFailed => "validation_failed",
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// History Schema
// ============================================================================

/// One persisted category/value observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: i64,
    pub metric_name: String,
    pub category: String,
    pub value: f64,
    pub extracted_at: String, // RFC3339
    #[serde(skip_serializing, default)]
    pub source_graph_hash: Option<String>,
}

/// Category/value pair handed to the model as historical context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub category: String,
    pub value: f64,
}

impl From<&HistoryRow> for HistoricalPoint {
    fn from(row: &HistoryRow) -> Self {
        Self {
            category: row.category.clone(),
            value: row.value,
        }
    }
}

// ============================================================================
// API Requests
// ============================================================================

/// Screen capture upload: a `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCapRequest {
    pub image_data: String,
}
