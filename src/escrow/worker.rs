//! Auto-Release Worker
//!
//! Background scheduler that feeds the clock into the condition evaluator.
//! The core never self-schedules; this worker is the clock collaborator.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::EscrowError;
use super::service::EscrowService;
use crate::config::WorkerSettings;

/// Configuration for the auto-release worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan for due transactions
    pub scan_interval: Duration,
    /// Maximum transactions to evaluate per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            scan_interval: Duration::from_secs(settings.scan_interval_secs.max(1)),
            batch_size: settings.batch_size,
        }
    }
}

/// Periodically evaluates TIME_BASED conditions and triggers auto-release
///
/// Each evaluation takes the same per-transaction CAS as a user-driven
/// transition, so a racing `confirmReceipt` and a scheduler tick cannot
/// both release funds.
pub struct AutoReleaseWorker {
    service: Arc<EscrowService>,
    config: WorkerConfig,
}

impl AutoReleaseWorker {
    pub fn new(service: Arc<EscrowService>, config: WorkerConfig) -> Self {
        Self { service, config }
    }

    pub fn with_defaults(service: Arc<EscrowService>) -> Self {
        Self::new(service, WorkerConfig::default())
    }

    /// Run the scan loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Starting auto-release worker"
        );

        loop {
            if let Err(e) = self.scan_once().await {
                error!(error = %e, "Auto-release scan failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Run a single scan; returns the number of released transactions
    pub async fn scan_once(&self) -> Result<usize, EscrowError> {
        let now = self.service.now();
        let released = self
            .service
            .evaluate_time_conditions(now, self.config.batch_size)
            .await?;

        if released > 0 {
            info!(released, "Auto-release scan complete");
        } else {
            debug!("Auto-release scan found nothing to release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval, Duration::from_secs(60));
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_worker_config_from_settings() {
        let settings = WorkerSettings {
            scan_interval_secs: 0,
            batch_size: 10,
        };
        let config = WorkerConfig::from(&settings);
        assert_eq!(config.scan_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
    }
}
