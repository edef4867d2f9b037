//! Runs the stages of one batch in order and keeps the audit trail.
//!
//! Every task emits `started`, `metrics` and then `success` or `failed` events.
//! The run row is created as `running` and closed as `success` or `failed`;
//! the first failing stage stops the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::app::aggregate_use_case::AggregateUseCase;
use crate::app::health_check_use_case::HealthCheckUseCase;
use crate::app::ingest_use_case::{IngestSettings, IngestUseCase};
use crate::app::normalize_use_case::NormalizeUseCase;
use crate::app::ports::{
    AuditSink, DatasetStore, MetricsSink, PageSource, RawStore, RunRecord, RunStatus, TaskEvent,
    TaskStatus,
};
use crate::app::quality_gate_use_case::QualityGateUseCase;
use crate::config::PipelineConfig;
use crate::constants::{
    API_HEALTH_TASK, BRONZE_LAYER, BRONZE_TASK, DAG_ID, GOLD_LAYER, GOLD_TASK, QUALITY_TASK,
    SILVER_LAYER, SILVER_TASK,
};
use crate::error::Result;
use crate::infra::audit_store::SqliteAuditStore;
use crate::infra::http_client::ReqwestPageSource;
use crate::infra::metrics_store::SqliteMetricsStore;
use crate::pipeline::results::{
    envelope_json, BronzeResult, GoldResult, HealthResult, QualityResult, SilverResult, StageOutcome,
};
use crate::pipeline::storage::FsDatalake;
use crate::timing::{generate_run_id, round2};

/// How a run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Scheduled => "scheduled",
        }
    }

    /// Run id in the scheduler's style, e.g. `manual__2026-02-14T23:06:38`.
    pub fn dag_run_id(&self, started_at: DateTime<Utc>) -> String {
        format!("{}__{}", self.as_str(), started_at.format("%Y-%m-%dT%H:%M:%S"))
    }
}

/// One step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Health,
    Bronze,
    Silver,
    Gold,
    Quality,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Health,
        Stage::Bronze,
        Stage::Silver,
        Stage::Gold,
        Stage::Quality,
    ];

    pub fn task_id(&self) -> &'static str {
        match self {
            Stage::Health => API_HEALTH_TASK,
            Stage::Bronze => BRONZE_TASK,
            Stage::Silver => SILVER_TASK,
            Stage::Gold => GOLD_TASK,
            Stage::Quality => QUALITY_TASK,
        }
    }
}

/// The ports a run needs
#[derive(Clone)]
pub struct PipelineAdapters {
    pub source: Arc<dyn PageSource>,
    pub raw_store: Arc<dyn RawStore>,
    pub dataset_store: Arc<dyn DatasetStore>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub audit_sink: Arc<dyn AuditSink>,
}

impl PipelineAdapters {
    /// HTTP source, filesystem datalake and SQLite sinks under the datalake root.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let source = ReqwestPageSource::new(
            &config.api_url,
            config.request_timeout,
            config.fetch_retries,
            config.fetch_backoff,
        )?;
        let datalake = Arc::new(FsDatalake::new(&config.datalake_path));
        Ok(Self {
            source: Arc::new(source),
            raw_store: datalake.clone(),
            dataset_store: datalake,
            metrics_sink: Arc::new(SqliteMetricsStore::open_at_root(&config.datalake_path)?),
            audit_sink: Arc::new(SqliteAuditStore::open_at_root(&config.datalake_path)?),
        })
    }
}

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dag_id: String,
    pub dag_run_id: String,
    /// Time-based id shared with the metrics sink
    pub run_id: String,
    pub execution_date: String,
    pub triggered_by: Trigger,
    pub status: RunStatus,
    pub duration_seconds: f64,
    pub health: Option<HealthResult>,
    pub bronze: Option<BronzeResult>,
    pub silver: Option<SilverResult>,
    pub gold: Option<GoldResult>,
    pub quality: Option<QualityResult>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }

    fn outcomes(&self) -> Vec<&dyn StageOutcome> {
        let mut outcomes: Vec<&dyn StageOutcome> = Vec::new();
        if let Some(r) = &self.health {
            outcomes.push(r);
        }
        if let Some(r) = &self.bronze {
            outcomes.push(r);
        }
        if let Some(r) = &self.silver {
            outcomes.push(r);
        }
        if let Some(r) = &self.gold {
            outcomes.push(r);
        }
        if let Some(r) = &self.quality {
            outcomes.push(r);
        }
        outcomes
    }

    /// Error of the first failed stage.
    pub fn error(&self) -> Option<String> {
        self.outcomes()
            .into_iter()
            .find(|o| !o.succeeded())
            .map(|o| o.error().unwrap_or("failed without an error message").to_string())
    }

    /// Stage metrics keyed by layer, as stored on the run row.
    pub fn consolidated_metrics(&self) -> Map<String, Value> {
        let mut layers = Map::new();
        let stages: [(&str, Option<&dyn StageOutcome>); 3] = [
            (BRONZE_LAYER, self.bronze.as_ref().map(|r| r as &dyn StageOutcome)),
            (SILVER_LAYER, self.silver.as_ref().map(|r| r as &dyn StageOutcome)),
            (GOLD_LAYER, self.gold.as_ref().map(|r| r as &dyn StageOutcome)),
        ];
        for (layer, outcome) in stages {
            if let Some(outcome) = outcome.filter(|o| o.succeeded()) {
                let values: Map<String, Value> = outcome
                    .metrics()
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), json!(value)))
                    .collect();
                layers.insert(layer.to_string(), Value::Object(values));
            }
        }
        layers
    }
}

struct RunContext {
    dag_run_id: String,
    run_id: String,
    execution_date: String,
    trigger: Trigger,
    started_at: DateTime<Utc>,
}

/// Sequential runner of the pipeline stages
pub struct Orchestrator {
    audit_sink: Arc<dyn AuditSink>,
    health: HealthCheckUseCase,
    ingest: IngestUseCase,
    normalize: NormalizeUseCase,
    aggregate: AggregateUseCase,
    quality: QualityGateUseCase,
}

impl Orchestrator {
    pub fn new(adapters: PipelineAdapters, config: &PipelineConfig) -> Self {
        Self {
            audit_sink: adapters.audit_sink,
            health: HealthCheckUseCase::new(adapters.source.clone(), config.health.clone()),
            ingest: IngestUseCase::new(
                adapters.source,
                adapters.raw_store.clone(),
                adapters.metrics_sink.clone(),
                IngestSettings {
                    per_page: config.per_page,
                    max_pages: config.max_pages,
                },
            ),
            normalize: NormalizeUseCase::new(
                adapters.raw_store,
                adapters.dataset_store.clone(),
                adapters.metrics_sink.clone(),
                config.expected_schema.clone(),
                config.thresholds.schema_policy(),
            ),
            aggregate: AggregateUseCase::new(adapters.dataset_store, adapters.metrics_sink),
            quality: QualityGateUseCase::with_thresholds(config.thresholds.clone()),
        }
    }

    /// Replace the threshold-driven quality gate.
    pub fn with_quality_gate(mut self, quality: QualityGateUseCase) -> Self {
        self.quality = quality;
        self
    }

    /// Health check, Bronze, Silver, Gold and the quality gate.
    pub async fn run(&self, execution_date: &str, trigger: Trigger) -> RunSummary {
        self.run_stages(&Stage::ALL, execution_date, trigger).await
    }

    /// A single stage recorded as its own run.
    pub async fn run_stage(&self, stage: Stage, execution_date: &str, trigger: Trigger) -> RunSummary {
        self.run_stages(&[stage], execution_date, trigger).await
    }

    async fn run_stages(&self, stages: &[Stage], execution_date: &str, trigger: Trigger) -> RunSummary {
        let started_at = Utc::now();
        let ctx = RunContext {
            dag_run_id: trigger.dag_run_id(started_at),
            run_id: generate_run_id(),
            execution_date: execution_date.to_string(),
            trigger,
            started_at,
        };
        info!(dag_run_id = %ctx.dag_run_id, run_id = %ctx.run_id, execution_date, "Pipeline run started");

        self.upsert_run(RunRecord {
            dag_id: DAG_ID.to_string(),
            run_id: ctx.dag_run_id.clone(),
            status: RunStatus::Running,
            execution_date: Some(ctx.execution_date.clone()),
            start_time: Some(ctx.started_at),
            end_time: None,
            duration_seconds: None,
            triggered_by: Some(trigger.as_str().to_string()),
            host: Some(host_name()),
            metrics: Map::new(),
            error: None,
        })
        .await;

        let mut summary = RunSummary {
            dag_id: DAG_ID.to_string(),
            dag_run_id: ctx.dag_run_id.clone(),
            run_id: ctx.run_id.clone(),
            execution_date: ctx.execution_date.clone(),
            triggered_by: trigger,
            status: RunStatus::Running,
            duration_seconds: 0.0,
            health: None,
            bronze: None,
            silver: None,
            gold: None,
            quality: None,
        };

        for stage in stages {
            let date = ctx.execution_date.as_str();
            let run_id = ctx.run_id.as_str();
            let succeeded = match stage {
                Stage::Health => {
                    let result = self.task(&ctx, *stage, self.health.check()).await;
                    let ok = result.success;
                    summary.health = Some(result);
                    ok
                }
                Stage::Bronze => {
                    let result = self.task(&ctx, *stage, self.ingest.ingest(date, run_id)).await;
                    let ok = result.success;
                    summary.bronze = Some(result);
                    ok
                }
                Stage::Silver => {
                    let result = self.task(&ctx, *stage, self.normalize.transform(date, run_id)).await;
                    let ok = result.success;
                    summary.silver = Some(result);
                    ok
                }
                Stage::Gold => {
                    let result = self.task(&ctx, *stage, self.aggregate.transform(date, run_id)).await;
                    let ok = result.success;
                    summary.gold = Some(result);
                    ok
                }
                Stage::Quality => {
                    let result = match (&summary.bronze, &summary.silver, &summary.gold) {
                        (Some(bronze), Some(silver), Some(gold)) => {
                            let quality = &self.quality;
                            self.task(&ctx, *stage, async move { quality.check(bronze, silver, gold) })
                                .await
                        }
                        _ => {
                            let missing = QualityResult {
                                error: Some("Quality checks need the Bronze, Silver and Gold results".into()),
                                ..Default::default()
                            };
                            self.task(&ctx, *stage, async { missing }).await
                        }
                    };
                    let ok = result.success;
                    summary.quality = Some(result);
                    ok
                }
            };
            if !succeeded {
                break;
            }
        }

        let finished_at = Utc::now();
        let duration = (finished_at - ctx.started_at).num_milliseconds() as f64 / 1000.0;
        summary.duration_seconds = round2(duration);
        let error = summary.error();
        summary.status = if error.is_none() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        self.upsert_run(RunRecord {
            dag_id: DAG_ID.to_string(),
            run_id: ctx.dag_run_id.clone(),
            status: summary.status,
            execution_date: Some(ctx.execution_date.clone()),
            start_time: None,
            end_time: Some(finished_at),
            duration_seconds: Some(summary.duration_seconds),
            triggered_by: None,
            host: None,
            metrics: summary.consolidated_metrics(),
            error: error.clone(),
        })
        .await;

        match &error {
            None => info!(dag_run_id = %ctx.dag_run_id, duration_seconds = summary.duration_seconds, "Pipeline run succeeded"),
            Some(e) => error!(dag_run_id = %ctx.dag_run_id, "Pipeline run failed: {}", e),
        }
        summary
    }

    /// Wrap one stage with its started / metrics / success|failed events.
    async fn task<R, F>(&self, ctx: &RunContext, stage: Stage, work: F) -> R
    where
        F: Future<Output = R>,
        R: StageOutcome + Serialize,
    {
        let task_id = stage.task_id();
        self.emit(ctx, task_id, TaskStatus::Started, None, json!({})).await;

        let result = work.await;

        self.emit(ctx, task_id, TaskStatus::Metrics, None, envelope_json(&result))
            .await;
        if result.succeeded() {
            self.emit(ctx, task_id, TaskStatus::Success, None, json!({})).await;
        } else {
            let message = result.error().map(str::to_string);
            self.emit(ctx, task_id, TaskStatus::Failed, message, json!({})).await;
        }
        result
    }

    async fn emit(
        &self,
        ctx: &RunContext,
        task_id: &str,
        status: TaskStatus,
        message: Option<String>,
        metrics: Value,
    ) {
        let event = TaskEvent {
            dag_id: DAG_ID.to_string(),
            run_id: ctx.dag_run_id.clone(),
            task_id: task_id.to_string(),
            status,
            message,
            metrics,
            try_number: 1,
            execution_date: Some(ctx.execution_date.clone()),
            event_time: Utc::now(),
        };
        if let Err(e) = self.audit_sink.insert_task_event(&event).await {
            warn!(task_id, status = status.as_str(), error = %e, "Failed to record task event");
        }
    }

    async fn upsert_run(&self, run: RunRecord) {
        if let Err(e) = self.audit_sink.upsert_run(&run).await {
            warn!(run_id = %run.run_id, status = run.status.as_str(), error = %e, "Failed to record run");
        }
    }
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::FetchedPage;
    use crate::infra::in_memory::{task_statuses, InMemoryAuditSink, InMemoryMetricsSink};
    use crate::pipeline::processing::quality_gate::{DefaultQualityGate, GateVerdict, QualityGate};
    use crate::pipeline::storage::InMemoryDatalake;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct OnePageSource;

    #[async_trait]
    impl PageSource for OnePageSource {
        async fn fetch_page(&self, page: u32, _per_page: u32) -> Result<FetchedPage> {
            let records = if page == 1 {
                (1..=4)
                    .map(|i| {
                        json!({
                            "id": i.to_string(),
                            "name": format!("Brewery {}", i),
                            "brewery_type": "micro",
                            "city": "Denver",
                            "state": "Colorado"
                        })
                        .as_object()
                        .cloned()
                        .unwrap()
                    })
                    .collect()
            } else {
                Vec::new()
            };
            Ok(FetchedPage {
                page,
                records,
                latency: Duration::from_millis(1),
            })
        }

        async fn probe(&self, _timeout: Duration) -> Result<u16> {
            Ok(200)
        }
    }

    /// Default gate that notes whether its task had started when it ran.
    struct ObservedGate {
        audit: InMemoryAuditSink,
        started_first: Arc<AtomicBool>,
    }

    impl QualityGate for ObservedGate {
        fn evaluate(&self, bronze: &BronzeResult, silver: &SilverResult, gold: &GoldResult) -> GateVerdict {
            let statuses = task_statuses(&self.audit.events(), QUALITY_TASK);
            self.started_first.store(statuses == vec!["started"], Ordering::SeqCst);
            DefaultQualityGate::new().evaluate(bronze, silver, gold)
        }
    }

    #[tokio::test]
    async fn quality_gate_runs_inside_its_task() {
        let lake = Arc::new(InMemoryDatalake::new());
        let audit = InMemoryAuditSink::new();
        let adapters = PipelineAdapters {
            source: Arc::new(OnePageSource),
            raw_store: lake.clone(),
            dataset_store: lake,
            metrics_sink: Arc::new(InMemoryMetricsSink::new()),
            audit_sink: Arc::new(audit.clone()),
        };
        let config = PipelineConfig {
            expected_schema: crate::pipeline::processing::schema::SchemaDescriptor::new(["id", "name", "brewery_type", "city", "state"]),
            ..PipelineConfig::default()
        };
        let started_first = Arc::new(AtomicBool::new(false));
        let gate = ObservedGate {
            audit: audit.clone(),
            started_first: started_first.clone(),
        };
        let orchestrator =
            Orchestrator::new(adapters, &config).with_quality_gate(QualityGateUseCase::new(Box::new(gate)));

        let summary = orchestrator.run("2026-02-14", Trigger::Manual).await;

        assert!(summary.quality.is_some());
        assert!(started_first.load(Ordering::SeqCst));
        assert_eq!(
            task_statuses(&audit.events(), QUALITY_TASK).last().copied(),
            Some(if summary.succeeded() { "success" } else { "failed" })
        );
    }

    #[test]
    fn dag_run_ids_carry_the_trigger() {
        let at = Utc.with_ymd_and_hms(2026, 2, 14, 23, 6, 38).unwrap();
        assert_eq!(Trigger::Manual.dag_run_id(at), "manual__2026-02-14T23:06:38");
        assert_eq!(Trigger::Scheduled.dag_run_id(at), "scheduled__2026-02-14T23:06:38");
    }

    #[test]
    fn first_failed_stage_names_the_run_error() {
        let summary = RunSummary {
            dag_id: DAG_ID.into(),
            dag_run_id: "manual__x".into(),
            run_id: "20260214_230638".into(),
            execution_date: "2026-02-14".into(),
            triggered_by: Trigger::Manual,
            status: RunStatus::Failed,
            duration_seconds: 1.0,
            health: Some(HealthResult {
                success: true,
                ..Default::default()
            }),
            bronze: Some(BronzeResult {
                success: true,
                total_records: 3,
                ..Default::default()
            }),
            silver: Some(SilverResult::failed("2026-02-14", "0:00:00".into(), "Empty result: No valid records loaded")),
            gold: None,
            quality: None,
        };
        assert_eq!(summary.error().as_deref(), Some("Empty result: No valid records loaded"));
        let metrics = summary.consolidated_metrics();
        assert_eq!(metrics["bronze"]["total_records"], 3.0);
        assert!(!metrics.contains_key("silver"));
    }
}
