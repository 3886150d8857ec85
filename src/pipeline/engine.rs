//! One ingestion run, end to end
//!
//! ```text
//! dump path ─▶ StabilityGate ─▶ active providers ─▶ parse + filter
//!     ─▶ existing-key index ─▶ diff ─▶ batched conditional insert ─▶ delete dump
//! ```
//!
//! The engine owns the long-lived chain and store handles. It refuses to start
//! a run while another one is in progress, whatever runtime drives it.

use super::chain::ChainApi;
use super::config::PipelineConfig;
use super::db::ClaimStore;
use super::dump_file::{dump_file_path, Readiness, StabilityGate};
use super::error::IngestError;
use super::ingestion::insert_diff_claims;
use super::parser::load_claims_from_file;
use super::providers::load_active_providers;
use super::types::{RunOutcome, RunSummary, SkipReason};
use chrono::{Local, NaiveDate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Clears the in-progress flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PipelineEngine {
    chain: Arc<dyn ChainApi>,
    store: Arc<dyn ClaimStore>,
    config: PipelineConfig,
    gate: StabilityGate,
    running: AtomicBool,
}

impl PipelineEngine {
    pub fn new(chain: Arc<dyn ChainApi>, store: Arc<dyn ClaimStore>, config: PipelineConfig) -> Self {
        let gate = StabilityGate::new(config.stable_check_interval, config.stable_check_retries);
        Self {
            chain,
            store,
            config,
            gate,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Ingest today's dump (local date)
    pub async fn run_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<RunOutcome, IngestError> {
        self.run_for_date(Local::now().date_naive(), shutdown).await
    }

    /// Ingest the dump named for `date`
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RunOutcome, IngestError> {
        let Some(_guard) = self.try_begin() else {
            log::warn!("⚠️  Previous run still in progress, skipping");
            return Ok(RunOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let started = Instant::now();
        let path = dump_file_path(&self.config.dump_dir, date);
        log::info!("🚀 Run start: {}", path.display());

        // 1. File readiness
        match self.gate.wait_until_stable(&path, shutdown).await? {
            Readiness::NotFound => {
                log::info!("Dump file not found, skipping run: {}", path.display());
                return Ok(RunOutcome::Skipped(SkipReason::NotFound));
            }
            Readiness::Unstable => {
                log::warn!("⚠️  Dump file not stable, skipping run: {}", path.display());
                return Ok(RunOutcome::Skipped(SkipReason::Unstable));
            }
            Readiness::Cancelled => {
                log::info!("Shutdown requested while waiting for dump file");
                return Ok(RunOutcome::Cancelled);
            }
            Readiness::Stable { size } => {
                log::info!("📄 Using stable dump file {} ({} bytes)", path.display(), size);
            }
        }

        let mut summary = RunSummary::default();

        // 2. Active providers at the current head
        let active = load_active_providers(self.chain.as_ref())
            .await
            .map_err(IngestError::ProviderFilter)?;
        summary.active_providers = active.len();
        summary.providers_skipped = active.skipped;
        if active.is_empty() {
            log::warn!("⚠️  No active providers found; nothing to do");
            return Ok(RunOutcome::Skipped(SkipReason::NoActiveProviders));
        }

        // 3. Parse + provider filter
        let parsed = load_claims_from_file(&path, &active).await?;
        summary.parsed = parsed.decoded;
        summary.rejected = parsed.rejected.len();
        summary.candidates = parsed.claims.len();
        log::info!(
            "📥 Claims loaded: {} decoded, {} from active providers, {} inactive, {} rejected",
            parsed.decoded,
            parsed.claims.len(),
            parsed.inactive,
            parsed.rejected.len()
        );

        if self.config.strict_parse {
            if let Some(first) = parsed.rejected.first() {
                return Err(IngestError::StrictParse {
                    count: parsed.rejected.len(),
                    first_claim: first.claim_id.clone(),
                    first_reason: first.reason.clone(),
                });
            }
        }

        // 4. Existing-key index
        let existing = self
            .store
            .load_claim_keys()
            .await
            .map_err(IngestError::KeyIndex)?;
        summary.existing_keys = existing.len();
        log::info!("🔑 Loaded {} existing claim keys", existing.len());

        // 5. Diff + batched conditional insert
        let stats = insert_diff_claims(
            self.store.as_ref(),
            parsed.claims,
            &existing,
            self.config.bulk_size,
        )
        .await;
        summary.prepared = stats.prepared;
        summary.inserted = stats.inserted;
        summary.failed_rows = stats.failed_rows;
        summary.failed_batches = stats.failed_batches;

        // 6. Consume the dump; a leftover file is harmless on re-run
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                summary.dump_removed = true;
                log::info!("🗑️  Dump file removed: {}", path.display());
            }
            Err(e) => log::warn!("⚠️  Failed to remove dump file {}: {}", path.display(), e),
        }

        log::info!(
            "✅ Run end: took {:.1}s, added {} (prepared {}, failed batches {})",
            started.elapsed().as_secs_f64(),
            summary.inserted,
            summary.prepared,
            summary.failed_batches
        );

        Ok(RunOutcome::Completed(summary))
    }
}
