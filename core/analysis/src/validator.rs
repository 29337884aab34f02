use chart_insights_schemas::{HistoricalPoint, HistoryRow, InsightRecord, ValidationOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::HistoryStore;
use crate::error::AnalysisError;
use crate::extractor::parse_insights;
use crate::gateway::{ModelGateway, ResponseFormat};

/// Every data point is filed under this one bucket. Charts about different
/// subjects therefore share history.
pub const DEFAULT_METRIC_NAME: &str = "general_metric";

/// Second pass: cross-check a first-pass record against stored history
pub struct InsightValidator {
    gateway: Arc<dyn ModelGateway>,
    metric_name: String,
}

/// Record returned by the validator together with how it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInsights {
    pub record: InsightRecord,
    pub outcome: ValidationOutcome,
}

impl ValidatedInsights {
    fn unchanged(record: InsightRecord) -> Self {
        Self {
            record,
            outcome: ValidationOutcome::Unvalidated,
        }
    }
}

impl InsightValidator {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            gateway,
            metric_name: DEFAULT_METRIC_NAME.to_string(),
        }
    }

    /// Validate and refine insights using historical data.
    ///
    /// Validation failures degrade to the initial record. Store failures are
    /// returned as errors. New data points are persisted whenever the record
    /// has categorized data, whatever the cross-check outcome.
    pub async fn validate<S>(
        &self,
        initial: InsightRecord,
        store: &S,
    ) -> Result<ValidatedInsights, AnalysisError>
    where
        S: HistoryStore + ?Sized,
    {
        if initial.extracted_data.is_empty() {
            debug!("No extracted data; skipping validation");
            return Ok(ValidatedInsights::unchanged(initial));
        }

        let categories = initial.categories();
        if categories.is_empty() {
            debug!("No categorized data points; skipping validation");
            return Ok(ValidatedInsights::unchanged(initial));
        }

        let history = store
            .find_matching(&self.metric_name, &categories)
            .await
            .map_err(AnalysisError::Store)?;

        if history.is_empty() {
            info!("No historical data for {} categories", categories.len());
            self.persist(&initial, store).await?;
            return Ok(ValidatedInsights::unchanged(initial));
        }

        info!(
            "Cross-checking against {} historical rows",
            history.len()
        );

        let refined = match self.cross_check(&initial, &history).await {
            Ok(refined) => Some(refined),
            Err(e) => {
                warn!("Validation failed: {}", e);
                None
            }
        };

        self.persist(&initial, store).await?;

        Ok(match refined {
            Some(record) => ValidatedInsights {
                record,
                outcome: ValidationOutcome::Validated,
            },
            None => ValidatedInsights {
                record: initial,
                outcome: ValidationOutcome::ValidationFailed,
            },
        })
    }

    async fn cross_check(
        &self,
        initial: &InsightRecord,
        history: &[HistoryRow],
    ) -> Result<InsightRecord, AnalysisError> {
        let prompt = build_validation_prompt(initial, history);

        let response = self
            .gateway
            .complete(&prompt, ResponseFormat::Json)
            .await
            .map_err(AnalysisError::Gateway)?;

        parse_insights(&response)
    }

    async fn persist<S>(&self, record: &InsightRecord, store: &S) -> Result<usize, AnalysisError>
    where
        S: HistoryStore + ?Sized,
    {
        store
            .insert_points(&self.metric_name, &record.extracted_data)
            .await
            .map_err(AnalysisError::Store)
    }
}

/// Auditor prompt embedding the first-pass insights and matching history
pub fn build_validation_prompt(initial: &InsightRecord, history: &[HistoryRow]) -> String {
    let insights_json = serde_json::to_string(initial).unwrap_or_else(|_| "{}".to_string());
    let historical: Vec<HistoricalPoint> = history.iter().map(HistoricalPoint::from).collect();
    let historical_json = serde_json::to_string(&historical).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"
An initial analysis of a new chart produced these insights:
{}

Here is the relevant historical data for the same metrics from our database:
{}

Your task is to act as a senior auditor.
1. Cross-check the "trends" and "anomalies" from the initial analysis against the historical data.
2. Refine, confirm, or challenge the "recommendations". A recommendation is only valid if supported by both the new chart and the historical context.
3. Return a final, validated JSON object with the same structure as the initial analysis, but with the refined content.
"#,
        insights_json, historical_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::testing::{RecordingStore, ScriptedGateway};
    use chart_insights_schemas::DataPoint;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn record(points: Vec<DataPoint>) -> InsightRecord {
        InsightRecord {
            chart_type: "Bar Chart".to_string(),
            summary: "Monthly revenue".to_string(),
            trends: vec!["Growth".to_string()],
            anomalies: vec![],
            recommendations: vec!["Expand".to_string()],
            extracted_data: points,
        }
    }

    fn jan_feb() -> InsightRecord {
        record(vec![DataPoint::new("Jan", 150.0), DataPoint::new("Feb", 170.0)])
    }

    fn refined_json() -> String {
        json!({
            "chart_type": "Bar Chart",
            "summary": "Revenue growth is consistent with history",
            "trends": ["Growth confirmed"],
            "anomalies": [],
            "recommendations": [],
            "extracted_data": [{"category": "Jan", "value": 150}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_empty_data_skips_store() {
        let gateway = Arc::new(ScriptedGateway::default());
        let validator = InsightValidator::new(gateway.clone());
        let store = RecordingStore::default();

        let initial = record(vec![]);
        let result = validator.validate(initial.clone(), &store).await.unwrap();

        assert_eq!(result.record, initial);
        assert_eq!(result.outcome, ValidationOutcome::Unvalidated);
        assert_eq!(store.lookups(), 0);
        assert_eq!(store.row_count(), 0);
        assert!(gateway.text_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_uncategorized_data_skips_store() {
        let validator = InsightValidator::new(Arc::new(ScriptedGateway::default()));
        let store = RecordingStore::default();

        let initial = record(vec![
            serde_json::from_value(json!({"value": 1})).unwrap(),
            serde_json::from_value(json!({"label": "x", "value": 2})).unwrap(),
        ]);
        let result = validator.validate(initial.clone(), &store).await.unwrap();

        assert_eq!(result.record, initial);
        assert_eq!(store.lookups(), 0);
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_no_history_persists_and_returns_initial() {
        let gateway = Arc::new(ScriptedGateway::default());
        let validator = InsightValidator::new(gateway.clone());
        let store = RecordingStore::default();

        let result = validator.validate(jan_feb(), &store).await.unwrap();

        assert_eq!(result.record, jan_feb());
        assert_eq!(result.outcome, ValidationOutcome::Unvalidated);
        assert_eq!(store.lookups(), 1);
        assert_eq!(store.row_count(), 2);
        assert!(gateway.text_prompts().is_empty());
    }

    #[tokio::test]
    async fn test_history_with_valid_refinement() {
        let gateway = Arc::new(ScriptedGateway::with_text_reply(Ok(refined_json())));
        let validator = InsightValidator::new(gateway.clone());
        let store = RecordingStore::with_rows(vec![("Jan", 120.0)]);

        let result = validator.validate(jan_feb(), &store).await.unwrap();

        assert_eq!(result.outcome, ValidationOutcome::Validated);
        assert_eq!(result.record.summary, "Revenue growth is consistent with history");
        // initial points are stored, not the refined ones
        assert_eq!(store.row_count(), 3);

        let prompts = gateway.text_prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("senior auditor"));
        assert!(prompts[0].contains(r#"{"category":"Jan","value":120.0}"#));
        assert!(prompts[0].contains("Monthly revenue"));
    }

    #[tokio::test]
    async fn test_history_with_gateway_failure_falls_back() {
        let gateway = Arc::new(ScriptedGateway::with_text_reply(Err("service unavailable")));
        let validator = InsightValidator::new(gateway);
        let store = RecordingStore::with_rows(vec![("Feb", 160.0)]);

        let result = validator.validate(jan_feb(), &store).await.unwrap();

        assert_eq!(result.record, jan_feb());
        assert_eq!(result.outcome, ValidationOutcome::ValidationFailed);
        assert_eq!(store.row_count(), 3);
    }

    #[tokio::test]
    async fn test_history_with_invalid_json_falls_back() {
        let gateway = Arc::new(ScriptedGateway::with_text_reply(Ok(
            "The chart looks fine to me.".to_string(),
        )));
        let validator = InsightValidator::new(gateway);
        let store = RecordingStore::with_rows(vec![("Jan", 100.0)]);

        let result = validator.validate(jan_feb(), &store).await.unwrap();

        assert_eq!(result.record, jan_feb());
        assert_eq!(result.outcome, ValidationOutcome::ValidationFailed);
        assert_eq!(store.row_count(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let validator = InsightValidator::new(Arc::new(ScriptedGateway::default()));
        let store = RecordingStore::failing_writes();

        let err = validator.validate(jan_feb(), &store).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Store(_)));
    }

    #[tokio::test]
    async fn test_jan_feb_scenario_against_sqlite() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path(), 2).unwrap();
        let gateway = Arc::new(ScriptedGateway::with_text_reply(Ok(refined_json())));
        let validator = InsightValidator::new(gateway.clone());

        let first = validator.validate(jan_feb(), &db).await.unwrap();
        assert_eq!(first.record, jan_feb());
        assert_eq!(db.session().unwrap().count_rows().unwrap(), 2);
        assert!(gateway.text_prompts().is_empty());

        // same chart again: history now exists, rows are appended again
        let second = validator.validate(jan_feb(), &db).await.unwrap();
        assert_eq!(second.outcome, ValidationOutcome::Validated);
        assert_eq!(db.session().unwrap().count_rows().unwrap(), 4);
        assert_eq!(gateway.formats(), vec![ResponseFormat::Json]);
    }

    #[test]
    fn test_validation_prompt_embeds_history() {
        let rows = vec![HistoryRow {
            id: 1,
            metric_name: DEFAULT_METRIC_NAME.to_string(),
            category: "Jan".to_string(),
            value: 140.5,
            extracted_at: "2024-01-01T00:00:00.000000Z".to_string(),
            source_graph_hash: None,
        }];

        let prompt = build_validation_prompt(&jan_feb(), &rows);
        assert!(prompt.contains(r#"[{"category":"Jan","value":140.5}]"#));
        assert!(prompt.contains(r#""chart_type":"Bar Chart""#));
        assert!(prompt.contains("same structure as the initial analysis"));
    }
}
