use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::app::ports::{FetchedPage, PageSource};
use crate::error::{PipelineError, Result};
use crate::infra::page_schema::page_records;

/// OpenBreweryDB listing over HTTP with bounded, fixed-backoff retries.
pub struct ReqwestPageSource {
    client: reqwest::Client,
    base_url: String,
    retries: u32,
    backoff: Duration,
}

impl ReqwestPageSource {
    pub fn new(base_url: &str, timeout: Duration, retries: u32, backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            retries: retries.max(1),
            backoff,
        })
    }

    fn page_url(&self, page: u32, per_page: u32) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}page={}&per_page={}", self.base_url, separator, page, per_page)
    }
}

/// 429 and 5xx are worth another attempt; other failures are final.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl PageSource for ReqwestPageSource {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<FetchedPage> {
        let url = self.page_url(page, per_page);
        let source_name = format!("page {}", page);
        let mut last_error = None;

        for attempt in 1..=self.retries {
            let started = Instant::now();
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().await?;
                    let latency = started.elapsed();
                    let payload: Value = serde_json::from_slice(&bytes)
                        .map_err(|e| PipelineError::parse(source_name.as_str(), e))?;
                    let records = page_records(&source_name, payload)?;
                    debug!(page, attempt, records = records.len(), latency_ms = latency.as_millis() as u64, "Fetched page");
                    return Ok(FetchedPage {
                        page,
                        records,
                        latency,
                    });
                }
                Ok(resp) if is_retryable(resp.status()) => {
                    warn!(page, attempt, status = resp.status().as_u16(), "Retryable API status");
                    last_error = Some(PipelineError::Api {
                        message: format!("{} returned {}", url, resp.status()),
                    });
                }
                Ok(resp) => {
                    return Err(PipelineError::Api {
                        message: format!("{} returned {}", url, resp.status()),
                    });
                }
                Err(e) => {
                    warn!(page, attempt, error = %e, "Request failed");
                    last_error = Some(PipelineError::Http(e));
                }
            }
            if attempt < self.retries {
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineError::Api {
            message: format!("{} failed after {} attempts", url, self.retries),
        }))
    }

    async fn probe(&self, timeout: Duration) -> Result<u16> {
        let resp = self
            .client
            .get(self.page_url(1, 1))
            .timeout(timeout)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }
}
