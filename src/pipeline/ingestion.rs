//! Diff against persisted keys and batched conditional writes
//!
//! Candidates whose uniqueness tuple is already in the key index are
//! discarded; the rest are written in fixed-size unordered batches.
//!
//! Batch accounting:
//! - a batch that errors is logged and contributes nothing to `inserted`
//! - later batches still run
//! - `inserted` is the sum of store-reported inserts, so it can undercount
//!   after a partial failure but never overcounts

use super::config::DEFAULT_BULK_SIZE;
use super::db::ClaimStore;
use super::types::{Claim, ClaimKey};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Candidates staged for a conditional insert
    pub prepared: usize,
    /// Candidates already present in the key index
    pub existing: usize,
    /// Candidates repeating a tuple seen earlier in the same dump
    pub duplicates: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub inserted: u64,
    pub failed_rows: u64,
}

/// Keep candidates whose tuple is neither persisted nor already staged
///
/// Staged claims get `updated_at = now`; the store only ever writes it on
/// creation.
pub fn stage_new_claims(
    candidates: Vec<Claim>,
    existing: &HashSet<ClaimKey>,
    now: DateTime<Utc>,
    stats: &mut DiffStats,
) -> Vec<Claim> {
    let mut seen = HashSet::new();
    let mut staged = Vec::new();

    for mut claim in candidates {
        let key = claim.key();
        if existing.contains(&key) {
            stats.existing += 1;
            continue;
        }
        if !seen.insert(key) {
            stats.duplicates += 1;
            continue;
        }
        claim.updated_at = now;
        staged.push(claim);
    }

    stats.prepared = staged.len();
    staged
}

/// Insert the set difference between `candidates` and `existing`
pub async fn insert_diff_claims(
    store: &dyn ClaimStore,
    candidates: Vec<Claim>,
    existing: &HashSet<ClaimKey>,
    bulk_size: usize,
) -> DiffStats {
    let bulk_size = if bulk_size == 0 { DEFAULT_BULK_SIZE } else { bulk_size };
    let mut stats = DiffStats::default();

    let staged = stage_new_claims(candidates, existing, Utc::now(), &mut stats);
    if staged.is_empty() {
        log::info!("✅ Nothing new to insert ({} already stored)", stats.existing);
        return stats;
    }

    for (index, batch) in staged.chunks(bulk_size).enumerate() {
        stats.batches += 1;

        match store.insert_if_absent(batch).await {
            Ok(outcome) => {
                stats.inserted += outcome.inserted;
                stats.failed_rows += outcome.failed;
                if outcome.failed > 0 {
                    log::warn!(
                        "⚠️  Batch {} refused {} of {} rows",
                        index + 1,
                        outcome.failed,
                        batch.len()
                    );
                }
                log::debug!(
                    "Batch {}: {} rows, {} inserted",
                    index + 1,
                    batch.len(),
                    outcome.inserted
                );
            }
            Err(e) => {
                stats.failed_batches += 1;
                log::error!(
                    "❌ Batch {} ({} rows) failed, not credited: {}",
                    index + 1,
                    batch.len(),
                    e
                );
            }
        }
    }

    log::info!(
        "✅ Diff insert finished: prepared={} inserted={} batches={} failed_batches={} bulk_size={}",
        stats.prepared,
        stats.inserted,
        stats.batches,
        stats.failed_batches,
        bulk_size
    );

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::{BatchOutcome, SqliteClaimStore};
    use crate::pipeline::error::StoreError;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn make_claim(claim_id: u64, cid: &str) -> Claim {
        Claim {
            claim_id,
            provider_id: 1001,
            client_id: 2002,
            client_addr: "f02002".to_string(),
            data_cid: cid.to_string(),
            size: 2048,
            term_min: 1,
            term_max: 2,
            term_start: 100,
            sector: claim_id,
            miner_addr: "f01001".to_string(),
            updated_at: DateTime::from_timestamp(0, 0).unwrap(),
            meta: None,
        }
    }

    /// Records batch sizes and fails the batches whose index is listed
    struct FlakyStore {
        fail_batches: Vec<usize>,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl ClaimStore for FlakyStore {
        async fn load_claim_keys(&self) -> Result<HashSet<ClaimKey>, StoreError> {
            Ok(HashSet::new())
        }

        async fn insert_if_absent(&self, batch: &[Claim]) -> Result<BatchOutcome, StoreError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(batch.len());
            if self.fail_batches.contains(&index) {
                return Err(StoreError::Poisoned);
            }
            Ok(BatchOutcome {
                inserted: batch.len() as u64,
                failed: 0,
            })
        }
    }

    #[test]
    fn test_stage_skips_existing_and_repeated_tuples() {
        let existing: HashSet<ClaimKey> = [make_claim(1, "bafyA").key()].into_iter().collect();
        let candidates = vec![
            make_claim(1, "bafyA"),
            make_claim(2, "bafyB"),
            make_claim(2, "bafyB"),
            make_claim(3, "bafyC"),
        ];

        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut stats = DiffStats::default();
        let staged = stage_new_claims(candidates, &existing, now, &mut stats);

        assert_eq!(staged.len(), 2);
        assert_eq!(stats.prepared, 2);
        assert_eq!(stats.existing, 1);
        assert_eq!(stats.duplicates, 1);
        assert!(staged.iter().all(|c| c.updated_at == now));
    }

    #[tokio::test]
    async fn test_failed_batch_is_contained() {
        let store = FlakyStore {
            fail_batches: vec![1],
            calls: Mutex::new(Vec::new()),
        };
        let candidates: Vec<Claim> = (1..=10).map(|i| make_claim(i, &format!("bafy{}", i))).collect();

        let stats = insert_diff_claims(&store, candidates, &HashSet::new(), 4).await;

        assert_eq!(*store.calls.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.inserted, 6);
        assert_eq!(stats.prepared, 10);
    }

    #[tokio::test]
    async fn test_zero_bulk_size_uses_default() {
        let store = FlakyStore {
            fail_batches: vec![],
            calls: Mutex::new(Vec::new()),
        };
        let candidates: Vec<Claim> = (1..=3).map(|i| make_claim(i, &format!("bafy{}", i))).collect();

        let stats = insert_diff_claims(&store, candidates, &HashSet::new(), 0).await;

        assert_eq!(*store.calls.lock().unwrap(), vec![3]);
        assert_eq!(stats.inserted, 3);
    }

    #[tokio::test]
    async fn test_second_pass_inserts_nothing() {
        let store = SqliteClaimStore::with_connection(Connection::open_in_memory().unwrap(), "claims").unwrap();
        let candidates: Vec<Claim> = (1..=5).map(|i| make_claim(i, &format!("bafy{}", i))).collect();

        let first = insert_diff_claims(&store, candidates.clone(), &HashSet::new(), 2).await;
        assert_eq!(first.inserted, 5);

        // Stale (empty) index: the conditional insert still refuses duplicates
        let stale = insert_diff_claims(&store, candidates.clone(), &HashSet::new(), 2).await;
        assert_eq!(stale.prepared, 5);
        assert_eq!(stale.inserted, 0);

        let keys = store.load_claim_keys().await.unwrap();
        let fresh = insert_diff_claims(&store, candidates, &keys, 2).await;
        assert_eq!(fresh.prepared, 0);
        assert_eq!(fresh.batches, 0);
        assert_eq!(store.count().unwrap(), 5);
    }
}
