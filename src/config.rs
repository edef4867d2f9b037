use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::constants::{DEFAULT_API_URL, DEFAULT_DATALAKE_PATH, DEFAULT_LOG_FOLDER};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::quality_gate::ThresholdConfig;
use crate::pipeline::processing::schema::SchemaDescriptor;

/// API availability probe settings
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    pub retries: u32,
    pub timeout: Duration,
    pub sleep: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(5),
            sleep: Duration::from_secs(2),
        }
    }
}

/// Everything a run needs, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_url: String,
    pub datalake_path: PathBuf,
    pub log_folder: PathBuf,
    pub per_page: u32,
    pub max_pages: u32,
    pub request_timeout: Duration,
    pub fetch_retries: u32,
    pub fetch_backoff: Duration,
    pub health: HealthCheckConfig,
    pub expected_schema: SchemaDescriptor,
    pub thresholds: ThresholdConfig,
    pub pushgateway_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            datalake_path: PathBuf::from(DEFAULT_DATALAKE_PATH),
            log_folder: PathBuf::from(DEFAULT_LOG_FOLDER),
            per_page: 200,
            max_pages: 500,
            request_timeout: Duration::from_secs(30),
            fetch_retries: 3,
            fetch_backoff: Duration::from_secs(2),
            health: HealthCheckConfig::default(),
            expected_schema: SchemaDescriptor::default_expected(),
            thresholds: ThresholdConfig::default(),
            pushgateway_url: None,
        }
    }
}

impl PipelineConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: &str| -> Result<String> {
            match lookup(key) {
                None => Ok(default.to_string()),
                Some(v) if v.trim().is_empty() => {
                    Err(PipelineError::Configuration(format!("{} is set but empty", key)))
                }
                Some(v) => Ok(v.trim().to_string()),
            }
        };

        let per_page = number(&lookup, "PER_PAGE", defaults.per_page)?;
        if per_page == 0 {
            return Err(PipelineError::Configuration("PER_PAGE must be positive".into()));
        }

        Ok(Self {
            api_url: text("URL_API", DEFAULT_API_URL)?,
            datalake_path: PathBuf::from(text("DATALAKE_PATH", DEFAULT_DATALAKE_PATH)?),
            log_folder: PathBuf::from(text("LOG_FOLDER", DEFAULT_LOG_FOLDER)?),
            per_page,
            max_pages: number(&lookup, "MAX_PAGES", defaults.max_pages)?,
            request_timeout: seconds(&lookup, "REQUEST_TIMEOUT_SECS", 30.0)?,
            fetch_retries: number(&lookup, "FETCH_RETRIES", defaults.fetch_retries)?,
            fetch_backoff: seconds(&lookup, "FETCH_BACKOFF_SECS", 2.0)?,
            health: HealthCheckConfig {
                retries: number(&lookup, "API_HEALTHCHECK_RETRIES", defaults.health.retries)?,
                timeout: seconds(&lookup, "API_HEALTHCHECK_TIMEOUT", 5.0)?,
                sleep: seconds(&lookup, "API_HEALTHCHECK_SLEEP", 2.0)?,
            },
            expected_schema: expected_schema(lookup("EXPECTED_SILVER_SCHEMA").as_deref()),
            thresholds: thresholds(
                lookup("QUALITY_THRESHOLDS").as_deref(),
                lookup("THRESHOLDS_FILE").as_deref(),
            )?,
            pushgateway_url: lookup("PIPELINE_PUSHGATEWAY_URL").filter(|v| !v.trim().is_empty()),
        })
    }
}

fn number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let value: T = raw.trim().parse().map_err(|_| {
                PipelineError::Configuration(format!("{} is not a valid number: '{}'", key, raw))
            })?;
            if value < T::default() {
                return Err(PipelineError::Configuration(format!("{} must not be negative", key)));
            }
            Ok(value)
        }
    }
}

fn seconds<F>(lookup: &F, key: &str, default: f64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let value = number(lookup, key, default)?;
    Duration::try_from_secs_f64(value)
        .map_err(|_| PipelineError::Configuration(format!("{} is not a valid duration: {}", key, value)))
}

/// Parse the expected Silver columns from a JSON list.
///
/// Anything unusable falls back to the default OpenBreweryDB columns.
pub fn expected_schema(raw: Option<&str>) -> SchemaDescriptor {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return SchemaDescriptor::default_expected();
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => {
            let columns: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let schema = SchemaDescriptor::new(columns);
            if schema.is_empty() {
                warn!("EXPECTED_SILVER_SCHEMA is empty, using the default column list");
                SchemaDescriptor::default_expected()
            } else {
                schema
            }
        }
        _ => {
            warn!("EXPECTED_SILVER_SCHEMA is not a JSON list, using the default column list");
            SchemaDescriptor::default_expected()
        }
    }
}

/// Thresholds from inline JSON, else from a TOML file, else defaults.
pub fn thresholds(json: Option<&str>, toml_file: Option<&str>) -> Result<ThresholdConfig> {
    if let Some(raw) = json.filter(|r| !r.trim().is_empty()) {
        return serde_json::from_str(raw).map_err(|e| {
            PipelineError::Configuration(format!("QUALITY_THRESHOLDS is not valid JSON: {}", e))
        });
    }
    if let Some(path) = toml_file.filter(|p| !p.trim().is_empty()) {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("Failed to read thresholds file '{}': {}", path, e))
        })?;
        return Ok(toml::from_str(&content)?);
    }
    Ok(ThresholdConfig::default())
}

/// The batch date: explicit value, else `EXECUTION_DATE`, else today.
pub fn resolve_execution_date(explicit: Option<&str>) -> Result<String> {
    let env_date = std::env::var("EXECUTION_DATE").ok();
    let candidate = explicit
        .map(str::to_string)
        .or(env_date)
        .filter(|d| !d.trim().is_empty());
    match candidate {
        None => Ok(Local::now().format("%Y-%m-%d").to_string()),
        Some(raw) => {
            // scheduler timestamps carry a time part; only the date matters
            let date = raw.trim().get(..10).unwrap_or(raw.trim());
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map(|d| d.format("%Y-%m-%d").to_string())
                .map_err(|_| PipelineError::Configuration(format!("Invalid execution date '{}'", raw)))
        }
    }
}
