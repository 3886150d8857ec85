//! Shared fixtures for the engine and scheduler unit tests

use super::chain::{parse_id_address, ChainApi, CidLink, MinerPower, PowerClaim, TipSet};
use super::config::PipelineConfig;
use super::error::ChainError;
use super::types::id_address;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Fixed miner set: `powered` ids report power, `unpowered` ids report zero
#[derive(Debug, Default)]
pub struct StaticChain {
    pub powered: Vec<u64>,
    pub unpowered: Vec<u64>,
    pub head_fails: bool,
}

impl StaticChain {
    pub fn powered(ids: &[u64]) -> Self {
        Self {
            powered: ids.to_vec(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ChainApi for StaticChain {
    async fn chain_head(&self) -> Result<TipSet, ChainError> {
        if self.head_fails {
            return Err(ChainError::Status {
                method: "Filecoin.ChainHead",
                status: 503,
            });
        }
        Ok(TipSet {
            cids: vec![CidLink {
                cid: "bafyhead".to_string(),
            }],
            height: 4_000_000,
        })
    }

    async fn list_miners(&self, _tsk: &[CidLink]) -> Result<Vec<String>, ChainError> {
        Ok(self
            .powered
            .iter()
            .chain(&self.unpowered)
            .map(|id| id_address(*id))
            .collect())
    }

    async fn miner_power(&self, miner: &str, _tsk: &[CidLink]) -> Result<MinerPower, ChainError> {
        let id = parse_id_address(miner)?;
        let (raw, qa) = if self.powered.contains(&id) {
            ("34359738368", "343597383680")
        } else {
            ("0", "0")
        };
        Ok(MinerPower {
            miner_power: Some(PowerClaim {
                raw_byte_power: raw.to_string(),
                quality_adj_power: qa.to_string(),
            }),
        })
    }

    async fn lookup_id(&self, addr: &str, _tsk: &[CidLink]) -> Result<u64, ChainError> {
        parse_id_address(addr)
    }
}

/// Config pointing at `dump_dir` with a fast stability gate
pub fn test_config(dump_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        lotus_url: "http://127.0.0.1:1234/rpc/v1".to_string(),
        lotus_token: None,
        db_path: ":memory:".to_string(),
        table: "claims".to_string(),
        dump_dir: dump_dir.to_path_buf(),
        bulk_size: 2,
        run_interval: Duration::from_secs(3600),
        stable_check_interval: Duration::from_millis(10),
        stable_check_retries: 3,
        rpc_timeout: Duration::from_secs(5),
        strict_parse: false,
    }
}
