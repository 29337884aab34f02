//! Test doubles for the gateway and the history store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chart_insights_schemas::{DataPoint, HistoryRow};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::database::{point_fingerprint, HistoryStore};
use crate::gateway::{ModelGateway, ResponseFormat};
use crate::image_input::ChartImage;
use crate::validator::DEFAULT_METRIC_NAME;

type Reply = Result<String, String>;

/// Gateway that answers from queued replies and records every prompt
#[derive(Default)]
pub struct ScriptedGateway {
    image_replies: Mutex<VecDeque<Reply>>,
    text_replies: Mutex<VecDeque<Reply>>,
    image_prompts: Mutex<Vec<String>>,
    text_prompts: Mutex<Vec<String>>,
    formats: Mutex<Vec<ResponseFormat>>,
}

impl ScriptedGateway {
    pub fn with_image_reply(reply: Result<String, &str>) -> Self {
        let gateway = Self::default();
        gateway.push_image_reply(reply);
        gateway
    }

    pub fn with_text_reply(reply: Result<String, &str>) -> Self {
        let gateway = Self::default();
        gateway.push_text_reply(reply);
        gateway
    }

    pub fn push_image_reply(&self, reply: Result<String, &str>) {
        self.image_replies
            .lock()
            .unwrap()
            .push_back(reply.map_err(str::to_string));
    }

    pub fn push_text_reply(&self, reply: Result<String, &str>) {
        self.text_replies
            .lock()
            .unwrap()
            .push_back(reply.map_err(str::to_string));
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }

    pub fn text_prompts(&self) -> Vec<String> {
        self.text_prompts.lock().unwrap().clone()
    }

    pub fn formats(&self) -> Vec<ResponseFormat> {
        self.formats.lock().unwrap().clone()
    }

    fn next(queue: &Mutex<VecDeque<Reply>>) -> Result<String> {
        match queue.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted reply")),
        }
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn describe_image(
        &self,
        prompt: &str,
        _image: &ChartImage,
        format: ResponseFormat,
    ) -> Result<String> {
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        self.formats.lock().unwrap().push(format);
        Self::next(&self.image_replies)
    }

    async fn complete(&self, prompt: &str, format: ResponseFormat) -> Result<String> {
        self.text_prompts.lock().unwrap().push(prompt.to_string());
        self.formats.lock().unwrap().push(format);
        Self::next(&self.text_replies)
    }
}

/// In-memory store that counts lookups
#[derive(Default)]
pub struct RecordingStore {
    rows: Mutex<Vec<HistoryRow>>,
    lookups: Mutex<usize>,
    fail_writes: bool,
}

impl RecordingStore {
    pub fn with_rows(rows: Vec<(&str, f64)>) -> Self {
        let store = Self::default();
        let points: Vec<DataPoint> = rows
            .into_iter()
            .map(|(category, value)| DataPoint::new(category, value))
            .collect();
        store.push_points(DEFAULT_METRIC_NAME, &points);
        store
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn push_points(&self, metric_name: &str, points: &[DataPoint]) -> usize {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        for point in points {
            if let (Some(category), Some(value)) = (point.category(), point.value()) {
                let id = rows.len() as i64 + 1;
                rows.push(HistoryRow {
                    id,
                    metric_name: metric_name.to_string(),
                    category,
                    value,
                    extracted_at: "2024-01-01T00:00:00.000000Z".to_string(),
                    source_graph_hash: Some(point_fingerprint(point)),
                });
            }
        }
        rows.len() - before
    }
}

#[async_trait]
impl HistoryStore for RecordingStore {
    async fn find_matching(&self, metric_name: &str, categories: &[String]) -> Result<Vec<HistoryRow>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.metric_name == metric_name && categories.contains(&row.category))
            .cloned()
            .collect())
    }

    async fn insert_points(&self, metric_name: &str, points: &[DataPoint]) -> Result<usize> {
        if self.fail_writes {
            return Err(anyhow!("disk I/O error"));
        }
        Ok(self.push_points(metric_name, points))
    }
}
