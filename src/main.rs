use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use brewery_pipeline::config::{resolve_execution_date, PipelineConfig};
use brewery_pipeline::logging;
use brewery_pipeline::observability;
use brewery_pipeline::pipeline::{Orchestrator, PipelineAdapters, RunSummary, Stage, Trigger};
use brewery_pipeline::pipeline::results::StageOutcome;

#[derive(Parser)]
#[command(name = "brewery_pipeline")]
#[command(about = "OpenBreweryDB batch pipeline: Bronze, Silver, Gold and quality checks")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Execution date (YYYY-MM-DD); defaults to EXECUTION_DATE or today
    #[arg(long, global = true)]
    date: Option<String>,

    /// How this run was started, recorded in the audit trail
    #[arg(long, global = true, value_enum, default_value = "manual")]
    trigger: Trigger,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage: health check, Bronze, Silver, Gold and quality checks
    Run,
    /// Probe the source API
    Health,
    /// Land the raw API pages (Bronze)
    Ingest,
    /// Clean the raw partition into the Silver snapshot
    Silver,
    /// Aggregate the Silver snapshot into the Gold tables
    Gold,
}

fn print_summary(summary: &RunSummary) {
    let icon = if summary.succeeded() { "✅" } else { "❌" };
    println!("\n📊 Pipeline run {} ({})", summary.dag_run_id, summary.execution_date);
    println!("   Run id: {}", summary.run_id);
    println!("   Status: {} {}", icon, summary.status.as_str());
    println!("   Duration: {:.2}s", summary.duration_seconds);

    let stages: [Option<&dyn StageOutcome>; 5] = [
        summary.health.as_ref().map(|r| r as &dyn StageOutcome),
        summary.bronze.as_ref().map(|r| r as &dyn StageOutcome),
        summary.silver.as_ref().map(|r| r as &dyn StageOutcome),
        summary.gold.as_ref().map(|r| r as &dyn StageOutcome),
        summary.quality.as_ref().map(|r| r as &dyn StageOutcome),
    ];
    for outcome in stages.into_iter().flatten() {
        let mark = if outcome.succeeded() { "✓" } else { "✗" };
        println!("   {} {}", mark, outcome.stage());
    }
    if let Some(bronze) = &summary.bronze {
        println!("   Records landed: {} in {} pages", bronze.total_records, bronze.pages_processed);
    }
    if let Some(silver) = &summary.silver {
        println!("   Silver records: {}", silver.records);
    }
    if let Some(gold) = &summary.gold {
        println!("   Gold rows (state x type): {}", gold.records_gold);
    }
    if let Some(quality) = &summary.quality {
        for warning in &quality.warnings {
            println!("   ⚠️  {}", warning);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::from_env().context("Failed to load configuration")?;
    logging::init_logging(&config.log_folder);

    let execution_date = resolve_execution_date(cli.date.as_deref())?;
    let instance = execution_date.clone();
    if let Err(e) = observability::init_with_push_options(
        config.pushgateway_url.as_deref(),
        Some("brewery_pipeline"),
        Some(&instance),
    ) {
        warn!("Metrics disabled: {}", e);
    }

    let adapters = PipelineAdapters::from_config(&config)
        .with_context(|| format!("Failed to open the datalake at {}", config.datalake_path.display()))?;
    let orchestrator = Orchestrator::new(adapters, &config);

    let summary = match cli.command {
        Commands::Run => {
            println!("🚀 Running full pipeline for {}...", execution_date);
            orchestrator.run(&execution_date, cli.trigger).await
        }
        Commands::Health => {
            println!("🩺 Checking API availability...");
            orchestrator.run_stage(Stage::Health, &execution_date, cli.trigger).await
        }
        Commands::Ingest => {
            println!("📥 Ingesting raw pages for {}...", execution_date);
            orchestrator.run_stage(Stage::Bronze, &execution_date, cli.trigger).await
        }
        Commands::Silver => {
            println!("🔨 Building the Silver snapshot for {}...", execution_date);
            orchestrator.run_stage(Stage::Silver, &execution_date, cli.trigger).await
        }
        Commands::Gold => {
            println!("🏆 Building the Gold tables for {}...", execution_date);
            orchestrator.run_stage(Stage::Gold, &execution_date, cli.trigger).await
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if let Err(e) = observability::push_all_metrics().await {
        warn!("Failed to push metrics: {}", e);
    }

    if let Some(error) = summary.error() {
        bail!(error);
    }
    info!("Done");
    Ok(())
}
