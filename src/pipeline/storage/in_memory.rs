use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::fs::checksum;
use crate::app::ports::{DatasetStore, RawStore, StoredPartition};
use crate::domain::{page_sort_key, RawPage, Table};
use crate::error::{PipelineError, Result};

/// In-memory datalake for development/testing
#[derive(Default)]
pub struct InMemoryDatalake {
    raw: Mutex<HashMap<String, Vec<RawPage>>>,
    silver: Mutex<HashMap<String, Table>>,
    gold: Mutex<BTreeMap<(String, String), Table>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryDatalake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gold table previously written for `date`.
    pub fn gold_table(&self, date: &str, name: &str) -> Option<Table> {
        lock(&self.gold)
            .get(&(date.to_string(), name.to_string()))
            .cloned()
    }

    pub fn gold_tables(&self, date: &str) -> Vec<String> {
        lock(&self.gold)
            .keys()
            .filter(|(d, _)| d == date)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl RawStore for InMemoryDatalake {
    async fn read_raw_pages(&self, date: &str) -> Result<Vec<RawPage>> {
        let raw = lock(&self.raw);
        let pages = raw
            .get(date)
            .ok_or_else(|| PipelineError::UpstreamNotFound(format!("Raw partition not found: {}", date)))?;
        if pages.is_empty() {
            return Err(PipelineError::EmptyResult(format!("No pages stored for {}", date)));
        }
        let mut pages = pages.clone();
        pages.sort_by(|a, b| page_sort_key(&a.file_name).cmp(&page_sort_key(&b.file_name)));
        Ok(pages)
    }

    async fn replace_raw_pages(&self, date: &str, pages: &[RawPage]) -> Result<StoredPartition> {
        let mut checksums = BTreeMap::new();
        for page in pages {
            let bytes = serde_json::to_vec_pretty(&page.records)?;
            checksums.insert(page.file_name.clone(), checksum(&bytes));
        }
        lock(&self.raw).insert(date.to_string(), pages.to_vec());
        debug!(date, pages = pages.len(), "Stored raw pages in memory");
        Ok(StoredPartition {
            location: format!("memory://raw/{}", date),
            checksums,
        })
    }
}

#[async_trait]
impl DatasetStore for InMemoryDatalake {
    async fn write_silver(&self, date: &str, table: &Table) -> Result<String> {
        lock(&self.silver).insert(date.to_string(), table.clone());
        Ok(format!("memory://silver/{}", date))
    }

    async fn read_silver(&self, date: &str) -> Result<Table> {
        lock(&self.silver)
            .get(date)
            .cloned()
            .ok_or_else(|| PipelineError::UpstreamNotFound(format!("Silver partition not found: {}", date)))
    }

    async fn write_gold_tables(&self, date: &str, tables: &[(&str, &Table)]) -> Result<BTreeMap<String, String>> {
        let mut gold = lock(&self.gold);
        gold.retain(|(d, _), _| d != date);
        let mut locations = BTreeMap::new();
        for (name, table) in tables {
            gold.insert((date.to_string(), name.to_string()), (*table).clone());
            locations.insert(name.to_string(), format!("memory://gold/{}/{}", date, name));
        }
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_partitions_are_reported() {
        let lake = InMemoryDatalake::new();
        assert!(matches!(
            lake.read_raw_pages("2026-02-14").await,
            Err(PipelineError::UpstreamNotFound(_))
        ));
        lake.replace_raw_pages("2026-02-14", &[]).await.unwrap();
        assert!(matches!(
            lake.read_raw_pages("2026-02-14").await,
            Err(PipelineError::EmptyResult(_))
        ));
        assert!(lake.read_silver("2026-02-14").await.is_err());
    }

    #[tokio::test]
    async fn gold_tables_are_listed_per_date() {
        let lake = InMemoryDatalake::new();
        let table = Table::new(vec!["state".into()]);
        lake.write_gold_tables("2026-02-14", &[("breweries_by_type", &table)]).await.unwrap();
        lake.write_gold_tables("2026-02-14", &[("breweries_by_state", &table)]).await.unwrap();
        lake.write_gold_tables("2026-02-15", &[("breweries_by_type", &table)]).await.unwrap();
        assert_eq!(lake.gold_tables("2026-02-14"), vec!["breweries_by_state"]);
        assert!(lake.gold_table("2026-02-15", "breweries_by_type").is_some());
    }
}
