use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::app::ports::PageSource;
use crate::config::HealthCheckConfig;
use crate::observability::metrics;
use crate::pipeline::results::HealthResult;

/// Probes the source API before a run starts.
pub struct HealthCheckUseCase {
    source: Arc<dyn PageSource>,
    config: HealthCheckConfig,
}

impl HealthCheckUseCase {
    pub fn new(source: Arc<dyn PageSource>, config: HealthCheckConfig) -> Self {
        Self { source, config }
    }

    /// Up to `retries` probes; any 2xx answer means available.
    #[instrument(skip(self))]
    pub async fn check(&self) -> HealthResult {
        let attempts = self.config.retries.max(1);
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.source.probe(self.config.timeout).await {
                Ok(status) if (200..300).contains(&status) => {
                    metrics::health::probe(true);
                    info!(attempt, status, "API available");
                    return HealthResult {
                        success: true,
                        status_code: Some(status),
                        attempts: attempt,
                        error: None,
                    };
                }
                Ok(status) => {
                    warn!(attempt, status, "API answered with a non-success status");
                    last_status = Some(status);
                    last_error = format!("status {}", status);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "API probe failed");
                    last_error = e.to_string();
                }
            }
            metrics::health::probe(false);
            if attempt < attempts {
                tokio::time::sleep(self.config.sleep).await;
            }
        }

        HealthResult {
            success: false,
            status_code: last_status,
            attempts,
            error: Some(format!(
                "API unavailable after {} attempts: {}",
                attempts, last_error
            )),
        }
    }
}
