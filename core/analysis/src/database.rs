use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chart_insights_schemas::{DataPoint, HistoryRow};
use chrono::{SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Row};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows returned by the history listing
pub const HISTORY_PAGE_SIZE: usize = 100;

/// Access to previously extracted category/value observations.
///
/// The validator only ever sees this trait so tests can count interactions.
/// Each call is self-contained; no connection is held between calls.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Rows filed under `metric_name` whose category is any of `categories`
    async fn find_matching(&self, metric_name: &str, categories: &[String]) -> Result<Vec<HistoryRow>>;

    /// Insert one row per point that has both a category and a value.
    /// Returns the number of rows written.
    async fn insert_points(&self, metric_name: &str, points: &[DataPoint]) -> Result<usize>;
}

/// Pooled SQLite history database
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the history database and its schema
    pub fn new<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout = 5000;"));

        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| anyhow!("Failed to create connection pool: {}", e))?;

        let db = Self { pool };
        db.init_schema()?;

        let rows = db.session()?.count_rows()?;
        info!(
            "History database initialized at {} ({} rows)",
            path.display(),
            rows
        );
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS graph_data_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric_name TEXT NOT NULL,
                category TEXT NOT NULL,
                value REAL NOT NULL,
                extracted_at TEXT NOT NULL,
                source_graph_hash TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_history_metric_category
                ON graph_data_history(metric_name, category);
             CREATE INDEX IF NOT EXISTS idx_history_extracted_at
                ON graph_data_history(extracted_at DESC);",
        )?;
        Ok(())
    }

    /// Check out a connection. It returns to the pool when the session is
    /// dropped. Blocks while the pool is exhausted.
    pub fn session(&self) -> Result<HistorySession> {
        let conn = self
            .pool
            .get()
            .map_err(|e| anyhow!("Failed to get connection from pool: {}", e))?;
        Ok(HistorySession { conn })
    }

    /// Run `work` against a fresh session on the blocking thread pool
    async fn with_session<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut HistorySession) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = db.session()?;
            work(&mut session)
        })
        .await
        .context("History store task panicked")?
    }

    /// Most recent rows first
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistoryRow>> {
        self.with_session(move |session| session.recent(limit)).await
    }
}

#[async_trait]
impl HistoryStore for Database {
    async fn find_matching(&self, metric_name: &str, categories: &[String]) -> Result<Vec<HistoryRow>> {
        let metric_name = metric_name.to_string();
        let categories = categories.to_vec();
        self.with_session(move |session| session.find_matching(&metric_name, &categories))
            .await
    }

    async fn insert_points(&self, metric_name: &str, points: &[DataPoint]) -> Result<usize> {
        let metric_name = metric_name.to_string();
        let points = points.to_vec();
        self.with_session(move |session| session.insert_points(&metric_name, &points))
            .await
    }
}

/// A single pooled connection
pub struct HistorySession {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl HistorySession {
    /// Most recent rows first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, metric_name, category, value, extracted_at, source_graph_hash
             FROM graph_data_history
             ORDER BY extracted_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], row_to_history)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn count_rows(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM graph_data_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn find_matching(&self, metric_name: &str, categories: &[String]) -> Result<Vec<HistoryRow>> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; categories.len()].join(", ");
        let sql = format!(
            "SELECT id, metric_name, category, value, extracted_at, source_graph_hash
             FROM graph_data_history
             WHERE metric_name = ? AND category IN ({})
             ORDER BY id",
            placeholders
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let bind = std::iter::once(metric_name).chain(categories.iter().map(String::as_str));
        let rows = stmt
            .query_map(params_from_iter(bind), row_to_history)?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Found {} historical rows for {} ({} categories)",
            rows.len(),
            metric_name,
            categories.len()
        );
        Ok(rows)
    }

    /// Insert in one transaction, skipping points without a usable pair
    pub fn insert_points(&mut self, metric_name: &str, points: &[DataPoint]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO graph_data_history
                    (metric_name, category, value, extracted_at, source_graph_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for point in points {
                if !(point.has_category() && point.has_value()) {
                    continue;
                }

                let (Some(category), Some(value)) = (point.category(), point.value()) else {
                    warn!("Skipping data point with unusable category/value: {:?}", point.0);
                    continue;
                };

                stmt.execute(params![
                    metric_name,
                    category,
                    value,
                    now_timestamp(),
                    point_fingerprint(point),
                ])?;
                inserted += 1;
            }
        }

        tx.commit()?;

        debug!("Stored {} data points under {}", inserted, metric_name);
        Ok(inserted)
    }
}

fn row_to_history(row: &Row) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        metric_name: row.get(1)?,
        category: row.get(2)?,
        value: row.get(3)?,
        extracted_at: row.get(4)?,
        source_graph_hash: row.get(5)?,
    })
}

/// Fixed-width UTC timestamp so text ordering matches time ordering
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fingerprint of a data point's serialized form.
///
/// This identifies the extracted pair, not the source image; see
/// `image_input::image_content_hash` for the latter.
pub fn point_fingerprint(point: &DataPoint) -> String {
    let serialized = serde_json::to_string(&point.0).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(64);
    digest
}
