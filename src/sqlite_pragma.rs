//! Shared SQLite tuning applied to every connection the store opens.

use rusqlite::Connection;
use std::time::Duration;

/// Apply WAL journaling and the write-path PRAGMAs used by the record store.
///
/// - `journal_mode = WAL` so readers never block the flush writer
/// - `synchronous = NORMAL` (safe with WAL, avoids an fsync per commit)
/// - `temp_store = MEMORY`
/// - 64MB page cache, 256MB mmap
/// - `wal_autocheckpoint = 1000` pages
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(2))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -64_000)?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    Ok(())
}
