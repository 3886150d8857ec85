//! Claim store: existing-key index and conditional bulk inserts
//!
//! Schema (created on open, idempotent):
//! - unique index on (provider_id, data_cid, sector, term_start)
//! - partial unique index on (provider_id, claim_id)
//! - lookup indexes on client_addr, miner_addr, updated_at DESC
//!
//! Writes are insert-if-absent on the uniqueness tuple. A row that already
//! exists is never touched, so a writer that raced past the key scan turns
//! into a no-op instead of a duplicate or an overwrite.

use super::config::is_valid_identifier;
use super::error::StoreError;
use super::types::{Claim, ClaimKey};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Per-batch result reported by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows actually created
    pub inserted: u64,
    /// Rows the store refused (e.g. a claim id clash)
    pub failed: u64,
}

/// Persistent claim store used by the pipeline
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Scan every persisted uniqueness tuple
    async fn load_claim_keys(&self) -> Result<HashSet<ClaimKey>, StoreError>;

    /// Insert each claim unless its uniqueness tuple already exists
    ///
    /// Unordered: a refused row does not stop the rest of the batch.
    /// An `Err` means nothing in the batch may be credited.
    async fn insert_if_absent(&self, batch: &[Claim]) -> Result<BatchOutcome, StoreError>;
}

/// SQLite implementation of ClaimStore
///
/// One connection, opened at startup and shared for the life of the process.
pub struct SqliteClaimStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
    insert_sql: String,
}

impl SqliteClaimStore {
    /// Open (or create) the store at `db_path` and ensure the schema
    pub fn open(db_path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        Self::with_connection(conn, table)
    }

    /// Wrap an already open connection (in-memory databases in tests)
    pub fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        if !is_valid_identifier(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }

        ensure_schema(&conn, table)?;

        let insert_sql = format!(
            "INSERT INTO {t} (
                claim_id, provider_id, client_id, client_addr, data_cid,
                size, term_min, term_max, term_start, sector,
                miner_addr, updated_at, meta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(provider_id, data_cid, sector, term_start) DO NOTHING",
            t = table
        );

        log::info!("✅ Claim store ready (table: {})", table);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
            insert_sql,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of persisted claims
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: u64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

fn ensure_schema(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {t} (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            claim_id    INTEGER,
            provider_id INTEGER NOT NULL,
            client_id   INTEGER NOT NULL,
            client_addr TEXT,
            data_cid    TEXT NOT NULL,
            size        INTEGER NOT NULL,
            term_min    INTEGER NOT NULL,
            term_max    INTEGER NOT NULL,
            term_start  INTEGER NOT NULL,
            sector      INTEGER NOT NULL,
            miner_addr  TEXT,
            updated_at  INTEGER NOT NULL,
            meta        TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uniq_{t}_claim_tuple
            ON {t}(provider_id, data_cid, sector, term_start);
        CREATE UNIQUE INDEX IF NOT EXISTS uniq_{t}_provider_claimid
            ON {t}(provider_id, claim_id) WHERE claim_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_{t}_client_addr ON {t}(client_addr);
        CREATE INDEX IF NOT EXISTS idx_{t}_miner_addr ON {t}(miner_addr);
        CREATE INDEX IF NOT EXISTS idx_{t}_updated_at ON {t}(updated_at DESC);
        "#,
        t = table
    ))
}

#[async_trait]
impl ClaimStore for SqliteClaimStore {
    async fn load_claim_keys(&self) -> Result<HashSet<ClaimKey>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT provider_id, data_cid, sector, term_start FROM {}",
            self.table
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(ClaimKey {
                provider_id: row.get(0)?,
                data_cid: row.get(1)?,
                sector: row.get(2)?,
                term_start: row.get(3)?,
            })
        })?;

        let mut keys = HashSet::with_capacity(1_000_000);
        for key in rows {
            keys.insert(key?);
        }
        Ok(keys)
    }

    async fn insert_if_absent(&self, batch: &[Claim]) -> Result<BatchOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut outcome = BatchOutcome::default();

        {
            let mut stmt = tx.prepare_cached(&self.insert_sql)?;

            for claim in batch {
                let meta = match claim.meta.as_ref().map(serde_json::to_string).transpose() {
                    Ok(meta) => meta,
                    Err(e) => {
                        log::warn!("⚠️  Claim {} meta not serializable: {}", claim.key(), e);
                        outcome.failed += 1;
                        continue;
                    }
                };

                // Zero means "no claim id"; the claim-id index ignores NULLs
                let claim_id = (claim.claim_id != 0).then_some(claim.claim_id);

                let result = stmt.execute(params![
                    claim_id,
                    claim.provider_id,
                    claim.client_id,
                    claim.client_addr,
                    claim.data_cid,
                    claim.size,
                    claim.term_min,
                    claim.term_max,
                    claim.term_start,
                    claim.sector,
                    claim.miner_addr,
                    claim.updated_at.timestamp(),
                    meta,
                ]);

                match result {
                    Ok(changed) => outcome.inserted += changed as u64,
                    Err(e) => {
                        log::debug!("Row refused for {}: {}", claim.key(), e);
                        outcome.failed += 1;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }
}
