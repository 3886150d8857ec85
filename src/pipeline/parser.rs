//! Claim dump parser
//!
//! The dump is a JSON-RPC envelope whose `result` maps claim ids to claim
//! records. Producer versions disagree on encoding, so each field is decoded
//! with a fallback:
//!
//! - `Data`: `"bafy..."` or `{"/": "bafy..."}`
//! - integer fields: `12345` or `"12345"`
//!
//! The envelope is decoded in one step; if it is malformed nothing is
//! returned. Records are then decoded one at a time from borrowed raw slices
//! so a bad record is reported with its claim id instead of hiding the rest.

use super::error::ParseError;
use super::providers::ActiveProviderSet;
use super::types::{id_address, Claim};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Unsigned integer encoded as a JSON number or a decimal string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenientU64(pub u64);

/// Signed integer encoded as a JSON number or a decimal string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenientI64(pub i64);

/// Content identifier encoded as a string or an IPLD link object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidString(pub String);

struct U64Visitor;

impl<'de> Visitor<'de> for U64Visitor {
    type Value = LenientU64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned integer or a numeric string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientU64(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(LenientU64)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse::<u64>()
            .map(LenientU64)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for LenientU64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(U64Visitor)
    }
}

struct I64Visitor;

impl<'de> Visitor<'de> for I64Visitor {
    type Value = LenientI64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer or a numeric string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientI64(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(LenientI64)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse::<i64>()
            .map(LenientI64)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for LenientI64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(I64Visitor)
    }
}

struct CidVisitor;

impl<'de> Visitor<'de> for CidVisitor {
    type Value = CidString;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(r#"a CID string or {"/": "<cid>"}"#)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(CidString(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(CidString(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut cid = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == "/" {
                cid = Some(map.next_value::<String>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        cid.map(CidString).ok_or_else(|| de::Error::missing_field("/"))
    }
}

impl<'de> Deserialize<'de> for CidString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CidVisitor)
    }
}

/// One claim record as written by the dump producer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireClaim {
    provider: LenientU64,
    client: LenientU64,
    data: CidString,
    size: LenientI64,
    term_min: LenientI64,
    term_max: LenientI64,
    term_start: LenientI64,
    sector: LenientU64,
}

/// Just the provider, so inactive records are dropped before a full decode
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireProvider {
    provider: LenientU64,
}

#[derive(Deserialize)]
struct DumpEnvelope<'a> {
    #[serde(borrow)]
    result: HashMap<String, &'a RawValue>,
}

/// A record that matched neither accepted representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub claim_id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ParsedDump {
    /// Claims from active providers, ordered by claim id
    pub claims: Vec<Claim>,
    /// Records accepted: active claims plus inactive-provider records
    pub decoded: usize,
    /// Records dropped because their provider is not active
    pub inactive: usize,
    pub rejected: Vec<RejectedRecord>,
}

/// Decode one record; `Ok(None)` means its provider is not active
fn decode_record(
    claim_id: &str,
    raw: &RawValue,
    active: &ActiveProviderSet,
    now: DateTime<Utc>,
) -> Result<Option<Claim>, String> {
    let provider: WireProvider = serde_json::from_str(raw.get()).map_err(|e| e.to_string())?;
    if !active.contains(provider.provider.0) {
        return Ok(None);
    }

    let claim_id = claim_id
        .parse::<u64>()
        .map_err(|_| format!("claim id '{}' is not numeric", claim_id))?;
    let wire: WireClaim = serde_json::from_str(raw.get()).map_err(|e| e.to_string())?;

    let provider_id = wire.provider.0;
    let client_id = wire.client.0;

    Ok(Some(Claim {
        claim_id,
        provider_id,
        client_id,
        client_addr: id_address(client_id),
        data_cid: wire.data.0,
        size: wire.size.0,
        term_min: wire.term_min.0,
        term_max: wire.term_max.0,
        term_start: wire.term_start.0,
        sector: wire.sector.0,
        miner_addr: id_address(provider_id),
        updated_at: now,
        meta: None,
    }))
}

/// Decode a dump document and keep claims whose provider is active
///
/// Records of inactive providers are dropped on their `Provider` field
/// alone, so a malformed inactive record is never reported as rejected.
pub fn parse_dump(
    bytes: &[u8],
    active: &ActiveProviderSet,
    now: DateTime<Utc>,
) -> Result<ParsedDump, serde_json::Error> {
    let envelope: DumpEnvelope = serde_json::from_slice(bytes)?;

    let mut parsed = ParsedDump {
        claims: Vec::with_capacity(envelope.result.len()),
        ..Default::default()
    };

    for (claim_id, raw) in envelope.result {
        match decode_record(&claim_id, raw, active, now) {
            Ok(Some(claim)) => {
                parsed.decoded += 1;
                parsed.claims.push(claim);
            }
            Ok(None) => {
                parsed.decoded += 1;
                parsed.inactive += 1;
            }
            Err(reason) => parsed.rejected.push(RejectedRecord { claim_id, reason }),
        }
    }

    parsed.claims.sort_by_key(|c| c.claim_id);
    parsed.rejected.sort_by(|a, b| a.claim_id.cmp(&b.claim_id));
    Ok(parsed)
}

/// Read and decode the dump file at `path`
pub async fn load_claims_from_file(
    path: &Path,
    active: &ActiveProviderSet,
) -> Result<ParsedDump, ParseError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = parse_dump(&bytes, active, Utc::now()).map_err(|source| ParseError::Document {
        path: path.to_path_buf(),
        source,
    })?;

    for rejected in &parsed.rejected {
        log::error!(
            "❌ Dump record needs fixing upstream: claim {}: {}",
            rejected.claim_id,
            rejected.reason
        );
    }

    Ok(parsed)
}
