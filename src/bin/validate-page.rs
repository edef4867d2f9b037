use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::{fs, path::PathBuf};

use brewery_pipeline::infra::page_schema::{compile, violations, RAW_PAGE_SCHEMA};

/// Validate a landed page file against the raw page schema.
#[derive(Parser, Debug)]
#[command(name = "validate-page", version, about = "Validate a raw page JSON file against its schema")]
struct Cli {
    /// Path to the page JSON file to validate
    path: PathBuf,

    /// Optional path to a schema file (defaults to the bundled raw_page.v1.json)
    #[arg(long)]
    schema: Option<PathBuf>,
}

fn load_json(path: &PathBuf) -> Result<Value> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(json)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let schema_json = match &args.schema {
        Some(path) => load_json(path)?,
        None => serde_json::from_str(RAW_PAGE_SCHEMA).context("Bundled schema is not valid JSON")?,
    };
    let instance = load_json(&args.path)?;

    // the validator borrows the schema for the rest of the process
    let schema_static: &'static Value = Box::leak(Box::new(schema_json));
    let compiled = compile(schema_static).map_err(anyhow::Error::msg)?;

    let problems = violations(&compiled, &instance);
    if problems.is_empty() {
        println!("valid");
        return Ok(());
    }
    eprintln!("invalid:");
    for problem in problems {
        eprintln!("- {}", problem);
    }
    std::process::exit(1)
}
