//! Shared SQLite connection tuning

use rusqlite::Connection;
use std::time::Duration;

/// Checkpoint the WAL every 1000 pages
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Apply the PRAGMAs every store connection runs with
///
/// - WAL journal so the key scan never blocks a concurrent writer
/// - NORMAL sync (safe under WAL)
/// - temp tables in memory, 256 MiB mmap, ~64 MiB page cache
/// - busy timeout so a second pipeline instance waits instead of failing
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "cache_size", -65_536i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    conn.busy_timeout(Duration::from_secs(30))?;
    Ok(())
}
