//! Dump file location and write-completion gate
//!
//! The producer writes `all_claims_YYYYMMDD.json` in place, so a file that
//! exists may still be growing. The gate only reports `Stable` after two
//! consecutive size polls agree; nothing reads the file before that.

use super::error::IngestError;
use super::scheduler::shutdown_requested;
use chrono::NaiveDate;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

pub fn dump_file_name(date: NaiveDate) -> String {
    format!("all_claims_{}.json", date.format("%Y%m%d"))
}

/// Expected dump path for `date` inside `dump_dir`
pub fn dump_file_path(dump_dir: &Path, date: NaiveDate) -> PathBuf {
    dump_dir.join(dump_file_name(date))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotFound,
    /// Size still changing after the retry budget
    Unstable,
    Stable { size: u64 },
    Cancelled,
}

/// Polls a file's size until it stops changing
#[derive(Debug, Clone)]
pub struct StabilityGate {
    interval: Duration,
    retries: u32,
}

impl StabilityGate {
    pub fn new(interval: Duration, retries: u32) -> Self {
        Self { interval, retries }
    }

    /// Wait for `path` to stop growing
    ///
    /// Returns `NotFound` if the file is absent at the first stat. Each retry
    /// sleeps one interval then compares the size with the previous poll.
    /// Shutdown is honored during the sleeps.
    pub async fn wait_until_stable(
        &self,
        path: &Path,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Readiness, IngestError> {
        let mut prev_size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Readiness::NotFound),
            Err(e) => {
                return Err(IngestError::DumpStat {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        for attempt in 1..=self.retries {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(shutdown) => return Ok(Readiness::Cancelled),
            }

            let size = tokio::fs::metadata(path)
                .await
                .map_err(|e| IngestError::DumpStat {
                    path: path.to_path_buf(),
                    source: e,
                })?
                .len();

            if size == prev_size {
                return Ok(Readiness::Stable { size });
            }

            log::info!(
                "⏳ Dump file still growing: {} ({} -> {} bytes, retry {}/{})",
                path.display(),
                prev_size,
                size,
                attempt,
                self.retries
            );
            prev_size = size;
        }

        Ok(Readiness::Unstable)
    }
}
