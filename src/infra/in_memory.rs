use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::ports::{AuditSink, MetricEntry, MetricsSink, RunRecord, TaskEvent};
use crate::error::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Metrics sink that keeps every entry; cloned handles share the entries.
#[derive(Clone, Default)]
pub struct InMemoryMetricsSink {
    entries: Arc<Mutex<Vec<MetricEntry>>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<MetricEntry> {
        lock(&self.entries).clone()
    }

    pub fn for_layer(&self, layer: &str) -> Vec<MetricEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.layer == layer)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn save_metric(&self, entry: &MetricEntry) -> Result<()> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }
}

/// Audit sink that mirrors the upsert semantics of the SQLite store.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<TaskEvent>>>,
    runs: Arc<Mutex<HashMap<(String, String), RunRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        lock(&self.events).clone()
    }

    pub fn run(&self, dag_id: &str, run_id: &str) -> Option<RunRecord> {
        lock(&self.runs)
            .get(&(dag_id.to_string(), run_id.to_string()))
            .cloned()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        lock(&self.runs).values().cloned().collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn insert_task_event(&self, event: &TaskEvent) -> Result<()> {
        let key = (event.dag_id.clone(), event.run_id.clone());
        lock(&self.runs).entry(key).or_insert_with(|| RunRecord {
            dag_id: event.dag_id.clone(),
            run_id: event.run_id.clone(),
            status: crate::app::ports::RunStatus::Running,
            execution_date: event.execution_date.clone(),
            start_time: Some(event.event_time),
            end_time: None,
            duration_seconds: None,
            triggered_by: None,
            host: None,
            metrics: Default::default(),
            error: None,
        });
        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn upsert_run(&self, run: &RunRecord) -> Result<()> {
        let mut runs = lock(&self.runs);
        let key = (run.dag_id.clone(), run.run_id.clone());
        match runs.get_mut(&key) {
            None => {
                runs.insert(key, run.clone());
            }
            Some(stored) => {
                stored.status = run.status;
                keep_or_replace(&mut stored.execution_date, &run.execution_date);
                keep_or_replace(&mut stored.start_time, &run.start_time);
                keep_or_replace(&mut stored.end_time, &run.end_time);
                keep_or_replace(&mut stored.duration_seconds, &run.duration_seconds);
                keep_or_replace(&mut stored.triggered_by, &run.triggered_by);
                keep_or_replace(&mut stored.host, &run.host);
                keep_or_replace(&mut stored.error, &run.error);
                for (k, v) in &run.metrics {
                    stored.metrics.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

fn keep_or_replace<T: Clone>(stored: &mut Option<T>, incoming: &Option<T>) {
    if incoming.is_some() {
        *stored = incoming.clone();
    }
}

/// Statuses of the events recorded for one task, oldest first.
pub fn task_statuses(events: &[TaskEvent], task_id: &str) -> Vec<&'static str> {
    events
        .iter()
        .filter(|e| e.task_id == task_id)
        .map(|e| e.status.as_str())
        .collect()
}

/// Metrics payload of the `metrics` event of one task, if any.
pub fn task_metrics<'a>(events: &'a [TaskEvent], task_id: &str) -> Option<&'a Value> {
    events
        .iter()
        .find(|e| e.task_id == task_id && e.status == crate::app::ports::TaskStatus::Metrics)
        .map(|e| &e.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{RunStatus, TaskStatus};
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn upserts_keep_previous_values() {
        let sink = InMemoryAuditSink::new();
        let event = TaskEvent {
            dag_id: "dag".into(),
            run_id: "run".into(),
            task_id: "bronze_ingestion".into(),
            status: TaskStatus::Started,
            message: None,
            metrics: json!({}),
            try_number: 1,
            execution_date: Some("2026-02-14".into()),
            event_time: Utc::now(),
        };
        sink.insert_task_event(&event).await.unwrap();
        sink.upsert_run(&RunRecord {
            dag_id: "dag".into(),
            run_id: "run".into(),
            status: RunStatus::Success,
            execution_date: None,
            start_time: None,
            end_time: Some(Utc::now()),
            duration_seconds: Some(2.0),
            triggered_by: Some("manual".into()),
            host: None,
            metrics: json!({"gold": {"records_gold": 4}}).as_object().cloned().unwrap(),
            error: None,
        })
        .await
        .unwrap();

        let run = sink.run("dag", "run").unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.execution_date.as_deref(), Some("2026-02-14"));
        assert_eq!(run.metrics["gold"]["records_gold"], 4);
        assert_eq!(task_statuses(&sink.events(), "bronze_ingestion"), vec!["started"]);
    }
}
