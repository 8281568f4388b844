//! Escrow Engine - auto-release scheduler process
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  Config  │───▶│ EscrowStore  │───▶│EscrowService │───▶│ Wallet/Notify│
//! │  (YAML)  │    │ (PG / memory)│    │  (CAS + FSM) │    │  (after CAS) │
//! └──────────┘    └──────────────┘    └──────▲───────┘    └──────────────┘
//!                                            │ tick
//!                                    ┌───────┴────────┐
//!                                    │AutoReleaseWorker│
//!                                    └────────────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use escrow_engine::config::AppConfig;
use escrow_engine::escrow::{
    AutoReleaseWorker, EscrowService, EscrowStore, LoggingNotifier, LoggingWallet, MemoryStore,
    PgEscrowStore, SystemClock, WorkerConfig,
};
use escrow_engine::logging::init_logging;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);

    info!(env = %env, git_hash = env!("GIT_HASH"), "Escrow engine starting");

    let store: Arc<dyn EscrowStore> = match &config.postgres_url {
        Some(url) => Arc::new(
            PgEscrowStore::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?,
        ),
        None => {
            warn!("postgres_url not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let service = Arc::new(EscrowService::new(
        store,
        Arc::new(LoggingWallet),
        Arc::new(LoggingNotifier),
        Arc::new(SystemClock),
        config.escrow.clone(),
    ));

    let worker = AutoReleaseWorker::new(service, WorkerConfig::from(&config.worker));

    tokio::select! {
        _ = worker.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
