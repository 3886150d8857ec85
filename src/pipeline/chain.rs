//! Chain-state collaborator
//!
//! `ChainApi` is the seam the provider filter is written against.
//! `LotusClient` implements it over the Lotus full-node JSON-RPC v1 API:
//!
//! - `Filecoin.ChainHead`
//! - `Filecoin.StateListMiners`
//! - `Filecoin.StateMinerPower`
//! - `Filecoin.StateLookupID`
//!
//! Every state query is pinned to the tipset key returned by `chain_head`, so
//! one run sees one consistent chain snapshot.

use super::error::ChainError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// IPLD link as it appears on the wire: `{"/": "bafy..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "/")]
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TipSet {
    #[serde(rename = "Cids")]
    pub cids: Vec<CidLink>,
    #[serde(rename = "Height")]
    pub height: i64,
}

impl TipSet {
    pub fn key(&self) -> &[CidLink] {
        &self.cids
    }
}

/// Power figures are big integers encoded as decimal strings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerClaim {
    #[serde(rename = "RawBytePower")]
    pub raw_byte_power: String,
    #[serde(rename = "QualityAdjPower")]
    pub quality_adj_power: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinerPower {
    #[serde(rename = "MinerPower", default)]
    pub miner_power: Option<PowerClaim>,
}

impl MinerPower {
    /// Raw byte power or quality-adjusted power strictly above zero
    pub fn has_nonzero_power(&self) -> bool {
        match &self.miner_power {
            Some(p) => {
                is_positive_decimal(&p.raw_byte_power) || is_positive_decimal(&p.quality_adj_power)
            }
            None => false,
        }
    }
}

/// Sign check on an arbitrary-width decimal string
///
/// Anything that is not a plain decimal integer counts as not positive.
pub fn is_positive_decimal(s: &str) -> bool {
    let s = s.trim();
    let digits = s.strip_prefix('+').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    digits.bytes().any(|b| b != b'0')
}

/// Parse an ID address (`f0123` / `t0123`) into its actor id
pub fn parse_id_address(addr: &str) -> Result<u64, ChainError> {
    let rest = addr
        .strip_prefix('f')
        .or_else(|| addr.strip_prefix('t'))
        .and_then(|r| r.strip_prefix('0'))
        .ok_or_else(|| ChainError::InvalidIdAddress(addr.to_string()))?;

    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChainError::InvalidIdAddress(addr.to_string()));
    }
    rest.parse::<u64>()
        .map_err(|_| ChainError::InvalidIdAddress(addr.to_string()))
}

/// Read-only chain state queries used by the provider filter
#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn chain_head(&self) -> Result<TipSet, ChainError>;

    /// Addresses of every miner actor at `tsk`
    async fn list_miners(&self, tsk: &[CidLink]) -> Result<Vec<String>, ChainError>;

    async fn miner_power(&self, miner: &str, tsk: &[CidLink]) -> Result<MinerPower, ChainError>;

    /// Canonical numeric actor id for `addr` at `tsk`
    async fn lookup_id(&self, addr: &str, tsk: &[CidLink]) -> Result<u64, ChainError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Lotus JSON-RPC client
///
/// Holds one `reqwest::Client` (and its connection pool) for the lifetime of
/// the process.
pub struct LotusClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    next_id: AtomicU64,
}

impl LotusClient {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            next_id: AtomicU64::new(1),
        })
    }

    /// Build the client and confirm the node answers `Filecoin.ChainHead`
    ///
    /// Used at startup so an unreachable node or a rejected token stops the
    /// process instead of failing every scheduled run.
    pub async fn connect(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Self::new(url, token, timeout)?;
        let head = client.chain_head().await?;
        log::info!("✅ Lotus node reachable (head height {})", head.height);
        Ok(client)
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Status {
                method,
                status: response.status().as_u16(),
            });
        }

        let rpc: RpcResponse = response.json().await?;
        if let Some(err) = rpc.error {
            return Err(ChainError::Rpc {
                method,
                code: err.code,
                message: err.message,
            });
        }

        match rpc.result {
            None | Some(Value::Null) => Err(ChainError::EmptyResult { method }),
            Some(value) => {
                serde_json::from_value(value).map_err(|source| ChainError::Decode { method, source })
            }
        }
    }
}

#[async_trait]
impl ChainApi for LotusClient {
    async fn chain_head(&self) -> Result<TipSet, ChainError> {
        self.call("Filecoin.ChainHead", json!([])).await
    }

    async fn list_miners(&self, tsk: &[CidLink]) -> Result<Vec<String>, ChainError> {
        self.call("Filecoin.StateListMiners", json!([tsk])).await
    }

    async fn miner_power(&self, miner: &str, tsk: &[CidLink]) -> Result<MinerPower, ChainError> {
        self.call("Filecoin.StateMinerPower", json!([miner, tsk])).await
    }

    async fn lookup_id(&self, addr: &str, tsk: &[CidLink]) -> Result<u64, ChainError> {
        let id_addr: String = self.call("Filecoin.StateLookupID", json!([addr, tsk])).await?;
        parse_id_address(&id_addr)
    }
}
