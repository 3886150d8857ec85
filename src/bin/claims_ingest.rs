//! Claims Ingest - periodic verified-registry claim ingestion
//!
//! Opens the Lotus client and the claim store once, then runs the ingestion
//! pipeline at startup and every `RUN_EVERY_HOURS` until CTRL+C.
//!
//! Usage:
//!   cargo run --release --bin claims_ingest
//!
//! Environment variables:
//!   FULLNODE_API_URL - Lotus JSON-RPC endpoint (required)
//!   FULLNODE_API_TOKEN - Bearer token (optional)
//!   CLAIMS_DB_PATH - SQLite database path (default: claims.db)
//!   CLAIMS_DUMP_DIR - Directory receiving all_claims_YYYYMMDD.json (default: .)
//!   RUN_EVERY_HOURS - Run period (default: 1)
//!   RUST_LOG - Log filter (default: info)

use claimsync::pipeline::{
    chain::LotusClient, config::PipelineConfig, db::SqliteClaimStore, engine::PipelineEngine,
    scheduler::run_scheduler,
};
use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("🚀 Claims Ingest");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("   ├─ Lotus: {}", config.lotus_url);
    info!("   ├─ Database: {} (table: {})", config.db_path, config.table);
    info!("   ├─ Dump dir: {}", config.dump_dir.display());
    info!("   ├─ Bulk size: {}", config.bulk_size);
    info!("   ├─ Run every: {}s", config.run_interval.as_secs());
    info!(
        "   └─ Stability gate: {} x {}s",
        config.stable_check_retries,
        config.stable_check_interval.as_secs()
    );

    // Long-lived handles, created once
    info!("🔧 Connecting to Lotus...");
    let chain = match LotusClient::connect(config.lotus_url.clone(), config.lotus_token.clone(), config.rpc_timeout).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("❌ Lotus node unavailable: {}", e);
            return Err(e.into());
        }
    };

    info!("🔧 Opening claim store...");
    let store = match SqliteClaimStore::open(&config.db_path, &config.table) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("❌ Failed to open claim store: {}", e);
            return Err(e.into());
        }
    };

    let period = config.run_interval;
    let engine = Arc::new(PipelineEngine::new(chain, store, config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(engine, period, shutdown_rx));

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, finishing current run..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }
    let _ = shutdown_tx.send(true);

    match scheduler.await {
        Ok(stats) => info!("✅ Claims ingest stopped after {} runs", stats.runs),
        Err(e) => error!("❌ Scheduler task failed: {}", e),
    }

    Ok(())
}
