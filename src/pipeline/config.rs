//! Pipeline configuration from environment variables
//!
//! Read once at process start and handed to the engine as an immutable value.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BULK_SIZE: usize = 2_000;

/// Longest accepted run period (one year)
pub const MAX_RUN_EVERY_HOURS: u64 = 24 * 365;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the claim ingestion runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lotus full-node JSON-RPC endpoint
    pub lotus_url: String,

    /// Bearer token for the full node (optional)
    pub lotus_token: Option<String>,

    /// Path to SQLite database file
    pub db_path: String,

    /// Table holding persisted claims
    pub table: String,

    /// Directory that receives all_claims_YYYYMMDD.json
    pub dump_dir: PathBuf,

    /// Conditional inserts per bulk write
    pub bulk_size: usize,

    pub run_interval: Duration,

    pub stable_check_interval: Duration,

    pub stable_check_retries: u32,

    pub rpc_timeout: Duration,

    /// Abort the run when any dump record fails to decode
    pub strict_parse: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FULLNODE_API_URL` (required)
    /// - `FULLNODE_API_TOKEN` (optional)
    /// - `CLAIMS_DB_PATH` (default: claims.db)
    /// - `CLAIMS_TABLE` (default: claims)
    /// - `CLAIMS_DUMP_DIR` (default: .)
    /// - `CLAIMS_BULK_SIZE` (default: 2000)
    /// - `RUN_EVERY_HOURS` (default: 1, at most one year)
    /// - `DUMP_STABLE_CHECK_INTERVAL_SECS` (default: 5)
    /// - `DUMP_STABLE_CHECK_RETRIES` (default: 3)
    /// - `RPC_TIMEOUT_SECS` (default: 30)
    /// - `CLAIMS_STRICT_PARSE` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let lotus_url = env::var("FULLNODE_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("FULLNODE_API_URL".to_string()))?;

        if !lotus_url.starts_with("http://") && !lotus_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "FULLNODE_API_URL must start with http:// or https://".to_string(),
            ));
        }

        let lotus_token = env::var("FULLNODE_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        let table = env::var("CLAIMS_TABLE").unwrap_or_else(|_| "claims".to_string());
        if !is_valid_identifier(&table) {
            return Err(ConfigError::InvalidValue(format!(
                "CLAIMS_TABLE must be a plain SQL identifier, got '{}'",
                table
            )));
        }

        let dump_dir = env::var("CLAIMS_DUMP_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| ".".to_string());

        let bulk_size = env::var("CLAIMS_BULK_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_BULK_SIZE);

        // Non-positive periods fall back to hourly
        let run_every_hours = env::var("RUN_EVERY_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .map(|h| h as u64)
            .unwrap_or(1);
        if run_every_hours > MAX_RUN_EVERY_HOURS {
            return Err(ConfigError::InvalidValue(format!(
                "RUN_EVERY_HOURS must be at most {}, got {}",
                MAX_RUN_EVERY_HOURS, run_every_hours
            )));
        }

        let stable_check_secs = env::var("DUMP_STABLE_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let stable_check_retries = env::var("DUMP_STABLE_CHECK_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);

        let rpc_timeout_secs = env::var("RPC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let strict_parse = env::var("CLAIMS_STRICT_PARSE")
            .ok()
            .and_then(|s| s.to_lowercase().parse().ok())
            .unwrap_or(false);

        Ok(Self {
            lotus_url,
            lotus_token,
            db_path: env::var("CLAIMS_DB_PATH").unwrap_or_else(|_| "claims.db".to_string()),
            table,
            dump_dir: PathBuf::from(dump_dir),
            bulk_size,
            run_interval: Duration::from_secs(run_every_hours * 3600),
            stable_check_interval: Duration::from_secs(stable_check_secs),
            stable_check_retries,
            rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            strict_parse,
        })
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
