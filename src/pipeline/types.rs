//! Claim data model
//!
//! A `Claim` is the unit of ingestion. Its uniqueness tuple
//! (provider_id, data_cid, sector, term_start) is the only identity the
//! pipeline trusts; the dump's claim id is stored but never used to dedupe.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Mainnet genesis (2020-08-25 22:00:00 UTC)
pub const FILECOIN_GENESIS_UNIX: i64 = 1_598_306_400;

/// Seconds per chain epoch
pub const EPOCH_DURATION_SECS: i64 = 30;

/// Convert a chain epoch to wall-clock time. Negative epochs have no time.
pub fn epoch_to_time(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch < 0 {
        return None;
    }
    let secs = epoch
        .checked_mul(EPOCH_DURATION_SECS)?
        .checked_add(FILECOIN_GENESIS_UNIX)?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Convert wall-clock time to the epoch containing it
pub fn time_to_epoch(t: DateTime<Utc>) -> i64 {
    (t.timestamp() - FILECOIN_GENESIS_UNIX).div_euclid(EPOCH_DURATION_SECS)
}

/// Build the ID-address string ("f0" + actor id) for an actor
pub fn id_address(actor_id: u64) -> String {
    format!("f0{}", actor_id)
}

/// A verified-registry claim as persisted in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub claim_id: u64,
    pub provider_id: u64,
    pub client_id: u64,
    /// ID address of the client ("f0" + client_id)
    pub client_addr: String,
    pub data_cid: String,
    /// Padded piece size in bytes
    pub size: i64,
    pub term_min: i64,
    pub term_max: i64,
    pub term_start: i64,
    pub sector: u64,
    /// ID address of the provider ("f0" + provider_id)
    pub miner_addr: String,
    /// Set once, when the row is created
    pub updated_at: DateTime<Utc>,
    pub meta: Option<HashMap<String, serde_json::Value>>,
}

impl Claim {
    pub fn key(&self) -> ClaimKey {
        ClaimKey {
            provider_id: self.provider_id,
            data_cid: self.data_cid.clone(),
            sector: self.sector,
            term_start: self.term_start,
        }
    }

    /// Wall-clock time of `term_start`
    pub fn term_start_time(&self) -> Option<DateTime<Utc>> {
        epoch_to_time(self.term_start)
    }

    pub fn term_min_duration(&self) -> Duration {
        epochs_to_duration(self.term_min)
    }

    pub fn term_max_duration(&self) -> Duration {
        epochs_to_duration(self.term_max)
    }
}

fn epochs_to_duration(epochs: i64) -> Duration {
    if epochs <= 0 {
        return Duration::ZERO;
    }
    Duration::from_secs((epochs as u64).saturating_mul(EPOCH_DURATION_SECS as u64))
}

/// Uniqueness tuple of a claim
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey {
    pub provider_id: u64,
    pub data_cid: String,
    pub sector: u64,
    pub term_start: i64,
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.provider_id, self.data_cid, self.sector, self.term_start
        )
    }
}

/// Why a run ended without ingesting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No dump file for today
    NotFound,
    /// Dump file size kept changing through the whole poll budget
    Unstable,
    /// Chain reported no provider with power
    NoActiveProviders,
    /// Another run still holds the engine
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotFound => "dump file not found",
            SkipReason::Unstable => "dump file not stable",
            SkipReason::NoActiveProviders => "no active providers",
            SkipReason::AlreadyRunning => "run already in progress",
        }
    }
}

/// Counters for one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub active_providers: usize,
    /// Miner actors skipped because their power or id lookup failed
    pub providers_skipped: usize,
    /// Records accepted from the dump, active or not
    pub parsed: usize,
    /// Records rejected by the lenient decoder
    pub rejected: usize,
    /// Records that survived the provider filter
    pub candidates: usize,
    pub existing_keys: usize,
    /// Candidates staged for a conditional insert
    pub prepared: usize,
    /// Rows the store reported as newly created
    pub inserted: u64,
    /// Rows refused inside otherwise successful batches
    pub failed_rows: u64,
    pub failed_batches: usize,
    pub dump_removed: bool,
}

/// Result of a single scheduler tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Skipped(SkipReason),
    /// Shutdown was observed between steps
    Cancelled,
}
