//! Error types for the claim ingestion pipeline
//!
//! Only `IngestError` escapes a run, and only as far as the scheduler,
//! which logs it and waits for the next tick. Per-actor and per-record
//! failures are counted in `RunSummary` instead of surfacing here.

use std::path::PathBuf;
use thiserror::Error;

/// Chain collaborator failures
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC {method} failed with HTTP status {status}")]
    Status { method: &'static str, status: u16 },

    #[error("RPC {method} returned error {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("RPC {method} returned no result")]
    EmptyResult { method: &'static str },

    #[error("invalid response from {method}: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("not an ID address: {0}")]
    InvalidIdAddress(String),
}

/// Store collaborator failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Dump-level decode failures (the whole document is rejected)
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that abort a single run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("stat dump file {path}: {source}")]
    DumpStat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("load active providers: {0}")]
    ProviderFilter(#[source] ChainError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{count} dump records rejected in strict mode (first: claim {first_claim}: {first_reason})")]
    StrictParse {
        count: usize,
        first_claim: String,
        first_reason: String,
    },

    #[error("load db keys: {0}")]
    KeyIndex(#[source] StoreError),
}
