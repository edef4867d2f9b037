use async_trait::async_trait;
use chrono::Local;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::app::ports::{MetricEntry, MetricsSink};
use crate::error::Result;
use crate::pipeline::results::MetricValue;

impl ToSql for MetricValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            MetricValue::Number(n) => ToSqlOutput::from(*n),
            MetricValue::Flag(b) => ToSqlOutput::from(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// Per-layer pipeline metrics in `<datalake>/metrics/metrics.db`.
pub struct SqliteMetricsStore {
    conn: Mutex<Connection>,
}

impl SqliteMetricsStore {
    pub fn open_at_root<P: AsRef<Path>>(datalake_root: P) -> Result<Self> {
        let db_path = datalake_root.as_ref().join("metrics").join("metrics.db");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_metrics (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id          TEXT,
                execution_date  TEXT,
                layer           TEXT,
                metric_name     TEXT,
                metric_value    REAL,
                created_at      TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every metric saved for `run_id`, in insertion order.
    pub fn metrics_for_run(&self, run_id: &str) -> Result<Vec<MetricEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT run_id, execution_date, layer, metric_name, metric_value
             FROM pipeline_metrics WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            let value = match row.get::<_, SqlValue>(4)? {
                SqlValue::Real(f) => MetricValue::Number(f),
                SqlValue::Integer(i) => MetricValue::Number(i as f64),
                SqlValue::Text(s) => MetricValue::Text(s),
                _ => MetricValue::Text(String::new()),
            };
            Ok(MetricEntry {
                run_id: row.get(0)?,
                execution_date: row.get(1)?,
                layer: row.get(2)?,
                metric_name: row.get(3)?,
                metric_value: value,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl MetricsSink for SqliteMetricsStore {
    async fn save_metric(&self, entry: &MetricEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO pipeline_metrics (run_id, execution_date, layer, metric_name, metric_value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.execution_date,
                entry.layer,
                entry.metric_name,
                entry.metric_value,
                Local::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
