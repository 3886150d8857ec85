//! Active provider filter
//!
//! Builds the set of provider actor ids with strictly positive raw or
//! quality-adjusted power at the current chain head. Rebuilt from scratch on
//! every run; nothing about power is cached between runs.
//!
//! Failure modes:
//! - head or miner list unavailable: the whole build fails
//! - power lookup or id resolution fails for one miner: that miner is skipped

use super::chain::ChainApi;
use super::error::ChainError;
use std::collections::HashSet;

/// Provider ids eligible for ingestion in the current run
#[derive(Debug, Clone, Default)]
pub struct ActiveProviderSet {
    ids: HashSet<u64>,
    /// Chain height the set was observed at
    pub height: i64,
    /// Miners dropped because a per-actor lookup failed
    pub skipped: usize,
}

impl ActiveProviderSet {
    pub fn from_ids(ids: impl IntoIterator<Item = u64>, height: i64) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            height,
            skipped: 0,
        }
    }

    pub fn contains(&self, provider_id: u64) -> bool {
        self.ids.contains(&provider_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Query chain state for every miner with power at the current head
pub async fn load_active_providers(chain: &dyn ChainApi) -> Result<ActiveProviderSet, ChainError> {
    let head = chain.chain_head().await?;
    let tsk = head.key();

    let miners = chain.list_miners(tsk).await?;
    log::info!("⛓️  Chain head {}: {} miner actors", head.height, miners.len());

    let mut active = ActiveProviderSet {
        ids: HashSet::with_capacity(16_384),
        height: head.height,
        skipped: 0,
    };
    let mut powerless = 0usize;

    for miner in &miners {
        let power = match chain.miner_power(miner, tsk).await {
            Ok(power) => power,
            Err(e) => {
                log::debug!("Skipping {}: power lookup failed: {}", miner, e);
                active.skipped += 1;
                continue;
            }
        };

        if !power.has_nonzero_power() {
            powerless += 1;
            continue;
        }

        match chain.lookup_id(miner, tsk).await {
            Ok(id) => {
                active.ids.insert(id);
            }
            Err(e) => {
                log::debug!("Skipping {}: id lookup failed: {}", miner, e);
                active.skipped += 1;
            }
        }
    }

    if active.skipped > 0 {
        log::warn!("⚠️  {} miners skipped due to lookup failures", active.skipped);
    }
    log::info!(
        "✅ Active providers loaded: {} (without power: {})",
        active.len(),
        powerless
    );

    Ok(active)
}
