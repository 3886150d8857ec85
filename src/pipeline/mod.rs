//! # Claim Ingestion Pipeline
//!
//! Periodically ingests the verified-registry claims dump into SQLite.
//!
//! ## Flow
//!
//! 1. Locate `all_claims_YYYYMMDD.json` and wait for its size to settle
//! 2. Build the active provider set from chain state at the current head
//! 3. Decode the dump leniently, keeping claims of active providers only
//! 4. Scan persisted uniqueness tuples into an in-memory index
//! 5. Insert the difference in fixed-size conditional batches
//! 6. Delete the consumed dump
//!
//! Persisted claims are never updated or removed. A provider losing power
//! later does not touch claims already stored.
//!
//! ## Module Organization
//!
//! - `types` - Claim record, uniqueness key, run outcomes, epoch helpers
//! - `error` - Error enums for each collaborator and for a run
//! - `config` - Environment configuration
//! - `dump_file` - Dump naming and the write-completion gate
//! - `chain` - Chain-state trait and the Lotus JSON-RPC client
//! - `providers` - Active provider filter
//! - `parser` - Lenient dump decoder
//! - `db` - Claim store trait and the SQLite implementation
//! - `ingestion` - Diff and batched conditional writes
//! - `engine` - One run, end to end
//! - `scheduler` - Periodic runs and shutdown

pub mod chain;
pub mod config;
pub mod db;
pub mod dump_file;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod parser;
pub mod providers;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use chain::{ChainApi, LotusClient};
pub use config::PipelineConfig;
pub use db::{ClaimStore, SqliteClaimStore};
pub use engine::PipelineEngine;
pub use error::{ChainError, IngestError, ParseError, StoreError};
pub use scheduler::run_scheduler;
pub use types::{Claim, ClaimKey, RunOutcome, RunSummary, SkipReason};
