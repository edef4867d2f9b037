//! Date-partitioned datalake on the local filesystem.
//!
//! ```text
//! <root>/raw/ingestion_date=YYYY-MM-DD/page_001.json
//! <root>/silver/processing_date=YYYY-MM-DD/breweries.json
//! <root>/gold/processing_date=YYYY-MM-DD/breweries_by_state.json
//! ```
//!
//! Every partition is written to a staging directory and renamed into place,
//! so readers never see a half-written batch and a failed write publishes
//! nothing.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::ports::{DatasetStore, RawStore, StoredPartition};
use crate::constants::{
    GOLD_DIR, INGESTION_PARTITION_KEY, PROCESSING_PARTITION_KEY, RAW_DIR, SILVER_DATASET, SILVER_DIR,
};
use crate::domain::{page_sort_key, RawPage, RawRecord, Table};
use crate::error::{PipelineError, Result};

pub struct FsDatalake {
    root: PathBuf,
}

impl FsDatalake {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_partition(&self, date: &str) -> PathBuf {
        self.root
            .join(RAW_DIR)
            .join(format!("{}={}", INGESTION_PARTITION_KEY, date))
    }

    pub fn silver_partition(&self, date: &str) -> PathBuf {
        self.root
            .join(SILVER_DIR)
            .join(format!("{}={}", PROCESSING_PARTITION_KEY, date))
    }

    pub fn gold_partition(&self, date: &str) -> PathBuf {
        self.root
            .join(GOLD_DIR)
            .join(format!("{}={}", PROCESSING_PARTITION_KEY, date))
    }
}

/// sha256 of a byte slice, hex encoded.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fill a staging directory next to `target`, then rename it over `target`.
///
/// The staging directory is removed when any step fails.
fn publish_partition<T>(target: &Path, fill: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    let parent = target.parent().ok_or_else(|| {
        PipelineError::Configuration(format!("Partition {} has no parent directory", target.display()))
    })?;
    fs::create_dir_all(parent)?;
    let partition = target.file_name().and_then(|n| n.to_str()).unwrap_or("partition");
    let staging = parent.join(format!(".staging-{}-{}", partition, Uuid::new_v4()));
    fs::create_dir_all(&staging)?;

    let published = fill(&staging).and_then(|value| {
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::rename(&staging, target)?;
        Ok(value)
    });
    if published.is_err() {
        let _ = fs::remove_dir_all(&staging);
    }
    published
}

fn parse_page(path: &Path, file_name: &str) -> Result<RawPage> {
    let bytes = fs::read(path)?;
    let records: Vec<RawRecord> =
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::parse(file_name, e))?;
    Ok(RawPage {
        file_name: file_name.to_string(),
        records,
    })
}

#[async_trait]
impl RawStore for FsDatalake {
    async fn read_raw_pages(&self, date: &str) -> Result<Vec<RawPage>> {
        let partition = self.raw_partition(date);
        if !partition.is_dir() {
            return Err(PipelineError::UpstreamNotFound(format!(
                "Raw partition not found: {}",
                partition.display()
            )));
        }

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&partition)? {
            let path = entry?.path();
            let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
            if !is_json || !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push((name.to_string(), path.clone()));
            }
        }
        if files.is_empty() {
            return Err(PipelineError::EmptyResult(format!(
                "No JSON files found in {}",
                partition.display()
            )));
        }
        files.sort_by(|a, b| page_sort_key(&a.0).cmp(&page_sort_key(&b.0)));

        let mut pages = Vec::with_capacity(files.len());
        for (name, path) in &files {
            pages.push(parse_page(path, name)?);
        }
        debug!(date, pages = pages.len(), "Loaded raw partition");
        Ok(pages)
    }

    async fn replace_raw_pages(&self, date: &str, pages: &[RawPage]) -> Result<StoredPartition> {
        let target = self.raw_partition(date);
        let checksums = publish_partition(&target, |staging| {
            let mut checksums = BTreeMap::new();
            for page in pages {
                let bytes = serde_json::to_vec_pretty(&page.records)?;
                fs::write(staging.join(&page.file_name), &bytes)?;
                checksums.insert(page.file_name.clone(), checksum(&bytes));
            }
            Ok(checksums)
        })?;
        info!(partition = %target.display(), pages = pages.len(), "Raw partition published");

        Ok(StoredPartition {
            location: target.display().to_string(),
            checksums,
        })
    }
}

#[async_trait]
impl DatasetStore for FsDatalake {
    async fn write_silver(&self, date: &str, table: &Table) -> Result<String> {
        let target = self.silver_partition(date);
        let file_name = format!("{}.json", SILVER_DATASET);
        let bytes = table.to_json_bytes()?;
        publish_partition(&target, |staging| {
            fs::write(staging.join(&file_name), &bytes)?;
            Ok(())
        })?;
        Ok(target.join(file_name).display().to_string())
    }

    async fn read_silver(&self, date: &str) -> Result<Table> {
        let partition = self.silver_partition(date);
        if !partition.is_dir() {
            return Err(PipelineError::UpstreamNotFound(format!(
                "Silver partition not found: {}",
                partition.display()
            )));
        }
        let path = partition.join(format!("{}.json", SILVER_DATASET));
        if !path.is_file() {
            return Err(PipelineError::UpstreamNotFound(format!(
                "Silver snapshot not found: {}",
                path.display()
            )));
        }
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::parse("silver snapshot", e))
    }

    async fn write_gold_tables(&self, date: &str, tables: &[(&str, &Table)]) -> Result<BTreeMap<String, String>> {
        let target = self.gold_partition(date);
        publish_partition(&target, |staging| {
            for (name, table) in tables {
                fs::write(staging.join(format!("{}.json", name)), table.to_json_bytes()?)?;
            }
            Ok(())
        })?;
        debug!(partition = %target.display(), tables = tables.len(), "Gold partition published");
        Ok(tables
            .iter()
            .map(|(name, _)| {
                let location = target.join(format!("{}.json", name));
                (name.to_string(), location.display().to_string())
            })
            .collect())
    }
}
