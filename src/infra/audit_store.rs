//! SQLite audit trail: one row per run plus an append-only task event log.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::app::ports::{AuditSink, RunRecord, TaskEvent};
use crate::error::Result;

/// Stored view of a run row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub status: String,
    pub execution_date: Option<String>,
    pub duration_seconds: Option<f64>,
    pub triggered_by: Option<String>,
    pub host: Option<String>,
    pub metrics: Map<String, Value>,
    pub error: Option<String>,
}

pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn open_at_root<P: AsRef<Path>>(datalake_root: P) -> Result<Self> {
        let db_path = datalake_root.as_ref().join("audit").join("audit.db");
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
            PRAGMA foreign_keys=ON;
            CREATE TABLE IF NOT EXISTS dag_runs (
                dag_id            TEXT NOT NULL,
                run_id            TEXT NOT NULL,
                status            TEXT NOT NULL,
                execution_date    TEXT,
                logical_date      TEXT,
                start_time        TEXT,
                end_time          TEXT,
                duration_seconds  REAL,
                triggered_by      TEXT,
                host              TEXT,
                metrics           TEXT NOT NULL DEFAULT '{}',
                error             TEXT,
                created_at        TEXT NOT NULL,
                updated_at        TEXT NOT NULL,
                PRIMARY KEY (dag_id, run_id)
            );
            CREATE TABLE IF NOT EXISTS task_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                dag_id      TEXT NOT NULL,
                run_id      TEXT NOT NULL,
                task_id     TEXT NOT NULL,
                status      TEXT NOT NULL,
                message     TEXT,
                metrics     TEXT NOT NULL DEFAULT '{}',
                try_number  INTEGER,
                event_time  TEXT NOT NULL,
                FOREIGN KEY (dag_id, run_id) REFERENCES dag_runs (dag_id, run_id)
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

    pub fn run(&self, dag_id: &str, run_id: &str) -> Result<Option<StoredRun>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT status, execution_date, duration_seconds, triggered_by, host, metrics, error
                 FROM dag_runs WHERE dag_id = ?1 AND run_id = ?2",
                params![dag_id, run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((status, execution_date, duration_seconds, triggered_by, host, metrics, error)) => {
                Ok(Some(StoredRun {
                    status,
                    execution_date,
                    duration_seconds,
                    triggered_by,
                    host,
                    metrics: parse_metrics(&metrics)?,
                    error,
                }))
            }
        }
    }

    /// `(task_id, status)` of every event of a run, oldest first.
    pub fn task_events(&self, dag_id: &str, run_id: &str) -> Result<Vec<(String, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT task_id, status FROM task_events WHERE dag_id = ?1 AND run_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![dag_id, run_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn parse_metrics(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn ensure_run_exists(
    conn: &Connection,
    dag_id: &str,
    run_id: &str,
    execution_date: Option<&str>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO dag_runs (dag_id, run_id, status, execution_date, logical_date, start_time,
                               metrics, created_at, updated_at)
         VALUES (?1, ?2, 'running', ?3, ?3, ?4, '{}', ?4, ?4)
         ON CONFLICT (dag_id, run_id) DO UPDATE SET updated_at = excluded.updated_at",
        params![dag_id, run_id, execution_date, now],
    )?;
    Ok(())
}

#[async_trait]
impl AuditSink for SqliteAuditStore {
    async fn insert_task_event(&self, event: &TaskEvent) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_run_exists(&tx, &event.dag_id, &event.run_id, event.execution_date.as_deref())?;
        tx.execute(
            "INSERT INTO task_events (dag_id, run_id, task_id, status, message, metrics, try_number, event_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.dag_id,
                event.run_id,
                event.task_id,
                event.status.as_str(),
                event.message,
                event.metrics.to_string(),
                event.try_number,
                event.event_time.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn upsert_run(&self, run: &RunRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT metrics FROM dag_runs WHERE dag_id = ?1 AND run_id = ?2",
                params![run.dag_id, run.run_id],
                |row| row.get(0),
            )
            .optional()?;
        let mut metrics = match previous {
            Some(raw) => parse_metrics(&raw)?,
            None => Map::new(),
        };
        metrics.extend(run.metrics.clone());

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO dag_runs (dag_id, run_id, status, execution_date, logical_date, start_time,
                                   end_time, duration_seconds, triggered_by, host, metrics, error,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT (dag_id, run_id) DO UPDATE SET
                status = excluded.status,
                execution_date = COALESCE(excluded.execution_date, dag_runs.execution_date),
                logical_date = COALESCE(excluded.logical_date, dag_runs.logical_date),
                start_time = COALESCE(excluded.start_time, dag_runs.start_time),
                end_time = COALESCE(excluded.end_time, dag_runs.end_time),
                duration_seconds = COALESCE(excluded.duration_seconds, dag_runs.duration_seconds),
                triggered_by = COALESCE(excluded.triggered_by, dag_runs.triggered_by),
                host = COALESCE(excluded.host, dag_runs.host),
                metrics = excluded.metrics,
                error = COALESCE(excluded.error, dag_runs.error),
                updated_at = excluded.updated_at",
            params![
                run.dag_id,
                run.run_id,
                run.status.as_str(),
                run.execution_date,
                run.start_time.map(|t| t.to_rfc3339()),
                run.end_time.map(|t| t.to_rfc3339()),
                run.duration_seconds,
                run.triggered_by,
                run.host,
                Value::Object(metrics).to_string(),
                run.error,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
