use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::escrow::invitation::{DEFAULT_CODE_LEN, DEFAULT_TTL_DAYS};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub escrow: EscrowConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    /// PostgreSQL connection URL; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

/// Lifecycle policy knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EscrowConfig {
    pub invitation_ttl_days: i64,
    pub invitation_code_len: usize,
    /// Fee rate in 10^6 precision (50_000 = 5%), used when terms omit a fee
    pub fee_rate: u64,
    pub min_price: Decimal,
    pub max_description_len: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            invitation_ttl_days: DEFAULT_TTL_DAYS,
            invitation_code_len: DEFAULT_CODE_LEN,
            fee_rate: 50_000,
            min_price: Decimal::ONE,
            max_description_len: 500,
        }
    }
}

/// Auto-release scheduler settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerSettings {
    pub scan_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.escrow.invitation_ttl_days > 0,
            "escrow.invitation_ttl_days must be positive"
        );
        anyhow::ensure!(
            self.escrow.invitation_code_len >= 8,
            "escrow.invitation_code_len must be at least 8"
        );
        anyhow::ensure!(
            self.escrow.fee_rate < crate::escrow::service::FEE_PRECISION,
            "escrow.fee_rate must be below 100%"
        );
        anyhow::ensure!(self.worker.batch_size > 0, "worker.batch_size must be positive");
        Ok(())
    }
}
