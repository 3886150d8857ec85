//! Periodic run scheduling and cooperative shutdown
//!
//! One run fires at startup, then one per interval. A run always finishes
//! before the loop looks at the timer again, so runs never overlap and ticks
//! missed during a long run collapse into a single late one.

use super::engine::PipelineEngine;
use super::types::RunOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Resolves once the shutdown flag is set
///
/// A dropped sender means nobody can request shutdown any more, so this
/// then never resolves.
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Counters for the life of a scheduler loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub runs: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Drive `engine` every `period` until shutdown
///
/// Arguments:
/// - `engine`: Shared engine; its own guard rejects overlapping runs
/// - `period`: Time between run starts
/// - `shutdown`: Flipped to `true` to stop after the current run
///
/// A failed run is logged and the loop waits for the next tick.
pub async fn run_scheduler(
    engine: Arc<PipelineEngine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SchedulerStats {
    log::info!("⏰ Starting claim ingestion scheduler (every {}s)", period.as_secs());

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = SchedulerStats::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = timer.tick() => {}
        }

        stats.runs += 1;
        match engine.run_once(&mut shutdown).await {
            Ok(RunOutcome::Completed(summary)) => {
                stats.completed += 1;
                log::info!(
                    "📊 Run #{}: inserted={} prepared={} rejected={} failed_batches={}",
                    stats.runs,
                    summary.inserted,
                    summary.prepared,
                    summary.rejected,
                    summary.failed_batches
                );
            }
            Ok(RunOutcome::Skipped(reason)) => {
                stats.skipped += 1;
                log::info!("Run #{} skipped: {}", stats.runs, reason.as_str());
            }
            Ok(RunOutcome::Cancelled) => break,
            Err(e) => {
                stats.failed += 1;
                log::error!("❌ Run #{} failed: {}", stats.runs, e);
            }
        }
    }

    log::info!(
        "🛑 Scheduler stopped after {} runs ({} completed, {} skipped, {} failed)",
        stats.runs,
        stats.completed,
        stats.skipped,
        stats.failed
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chain::{ChainApi, CidLink, MinerPower, TipSet};
    use crate::pipeline::db::SqliteClaimStore;
    use crate::pipeline::dump_file::dump_file_path;
    use crate::pipeline::error::ChainError;
    use crate::pipeline::test_support::{test_config, StaticChain};
    use async_trait::async_trait;
    use chrono::Local;
    use rusqlite::Connection;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::time::Instant;

    /// Head query that stalls on its first call; no miners, so every run
    /// ends right after it and leaves the dump in place
    struct StallingChain {
        first_stall: Duration,
        /// (call start, call end) per head query
        calls: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl ChainApi for StallingChain {
        async fn chain_head(&self) -> Result<TipSet, ChainError> {
            let start = Instant::now();
            let first = self.calls.lock().unwrap().is_empty();
            if first {
                tokio::time::sleep(self.first_stall).await;
            }
            self.calls.lock().unwrap().push((start, Instant::now()));
            Ok(TipSet {
                cids: vec![CidLink {
                    cid: "bafyhead".to_string(),
                }],
                height: 1,
            })
        }

        async fn list_miners(&self, _tsk: &[CidLink]) -> Result<Vec<String>, ChainError> {
            Ok(Vec::new())
        }

        async fn miner_power(&self, miner: &str, _tsk: &[CidLink]) -> Result<MinerPower, ChainError> {
            Err(ChainError::InvalidIdAddress(miner.to_string()))
        }

        async fn lookup_id(&self, addr: &str, _tsk: &[CidLink]) -> Result<u64, ChainError> {
            Err(ChainError::InvalidIdAddress(addr.to_string()))
        }
    }

    fn idle_engine(dir: &std::path::Path) -> Arc<PipelineEngine> {
        let store = SqliteClaimStore::with_connection(Connection::open_in_memory().unwrap(), "claims").unwrap();
        Arc::new(PipelineEngine::new(
            Arc::new(StaticChain::default()),
            Arc::new(store),
            test_config(dir),
        ))
    }

    #[tokio::test]
    async fn test_shutdown_requested_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            shutdown_requested(&mut rx).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_never_resolves() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let result = tokio::time::timeout(Duration::from_millis(50), shutdown_requested(&mut rx)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_run_after_shutdown() {
        let dir = tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let stats = run_scheduler(idle_engine(dir.path()), Duration::from_millis(10), rx).await;
        assert_eq!(stats.runs, 0);
    }

    #[tokio::test]
    async fn test_runs_immediately_then_periodically() {
        let dir = tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(idle_engine(dir.path()), Duration::from_millis(40), rx));

        tokio::time::sleep(Duration::from_millis(130)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        // No dump present: every run is skipped, none fail
        assert!(stats.runs >= 2, "runs = {}", stats.runs);
        assert_eq!(stats.skipped, stats.runs);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_collapses_missed_ticks() {
        let dir = tempdir().unwrap();
        std::fs::write(dump_file_path(dir.path(), Local::now().date_naive()), b"{}").unwrap();

        let period = Duration::from_millis(100);
        let gate = Duration::from_millis(10);
        let mut config = test_config(dir.path());
        config.stable_check_interval = gate;

        // First run lasts several periods
        let chain = Arc::new(StallingChain {
            first_stall: Duration::from_millis(350),
            calls: Mutex::new(Vec::new()),
        });
        let store = SqliteClaimStore::with_connection(Connection::open_in_memory().unwrap(), "claims").unwrap();
        let engine = Arc::new(PipelineEngine::new(chain.clone(), Arc::new(store), config));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(engine, period, rx));
        tokio::time::sleep(Duration::from_millis(600)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        let calls = chain.calls.lock().unwrap().clone();
        assert!(calls.len() >= 3, "calls = {}", calls.len());
        assert_eq!(stats.failed, 0);

        // The missed ticks become one run that starts as soon as the long run ends
        let (_, first_end) = calls[0];
        let (second_start, _) = calls[1];
        assert!(second_start - first_end <= gate + Duration::from_millis(5));

        // No catch-up burst: the following run waits a full period
        let (third_start, _) = calls[2];
        assert!(third_start - second_start >= period - Duration::from_millis(5));

        // 0..360 long run, then roughly one run per period
        assert!(stats.runs <= 4, "runs = {}", stats.runs);
    }
}
