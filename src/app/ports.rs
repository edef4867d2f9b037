use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{RawPage, RawRecord, Table};
use crate::error::Result;
use crate::pipeline::results::MetricValue;

// Source-side ports

/// One page as returned by the source API.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub page: u32,
    pub records: Vec<RawRecord>,
    pub latency: Duration,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page. Retries, if any, are resolved before this returns.
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<FetchedPage>;

    /// Single availability probe; returns the HTTP status.
    async fn probe(&self, timeout: Duration) -> Result<u16>;
}

// Datalake ports

/// Where a raw partition landed and what was written.
#[derive(Clone, Debug, Default)]
pub struct StoredPartition {
    pub location: String,
    /// sha256 hex per page file
    pub checksums: BTreeMap<String, String>,
}

#[async_trait]
pub trait RawStore: Send + Sync {
    /// Pages of one ingestion date, ordered by page number.
    async fn read_raw_pages(&self, date: &str) -> Result<Vec<RawPage>>;

    /// Publish all pages of a date at once, replacing any previous partition.
    async fn replace_raw_pages(&self, date: &str, pages: &[RawPage]) -> Result<StoredPartition>;
}

#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn write_silver(&self, date: &str, table: &Table) -> Result<String>;
    async fn read_silver(&self, date: &str) -> Result<Table>;
    /// Publish every Gold table of a date together, replacing the previous set.
    /// Returns the location of each table by name.
    async fn write_gold_tables(&self, date: &str, tables: &[(&str, &Table)]) -> Result<BTreeMap<String, String>>;
}

// Operational sinks

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub run_id: String,
    pub execution_date: String,
    pub layer: String,
    pub metric_name: String,
    pub metric_value: MetricValue,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn save_metric(&self, entry: &MetricEntry) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Started,
    Metrics,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::Metrics => "metrics",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub dag_id: String,
    pub run_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub message: Option<String>,
    pub metrics: Value,
    pub try_number: u32,
    pub execution_date: Option<String>,
    pub event_time: DateTime<Utc>,
}

/// Run-level audit row. `None` fields keep whatever was stored before.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub dag_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub execution_date: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub triggered_by: Option<String>,
    pub host: Option<String>,
    /// Merged key by key into the stored metrics.
    pub metrics: Map<String, Value>,
    pub error: Option<String>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a task event; the parent run row is created if missing.
    async fn insert_task_event(&self, event: &TaskEvent) -> Result<()>;
    async fn upsert_run(&self, run: &RunRecord) -> Result<()>;
}
