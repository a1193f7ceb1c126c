//! Durable record store
//!
//! The store is the single source of truth for persisted records. Every read,
//! aggregate and snapshot is derived from it.
//!
//! - `RecordWriter` - the write half the ingestion buffer depends on
//! - `RecordStore` - reads, period aggregation, clear, backup/restore
//! - `SqliteRecordStore` - the SQLite implementation of both

pub mod sqlite_store;

pub use sqlite_store::SqliteRecordStore;

use crate::error::StoreError;
use crate::types::{Backup, Event, Granularity, KeyStat, Record, TrendPoint};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;

#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Persist a batch in one atomic unit. Empty input is a no-op.
    ///
    /// Returns the number of records written.
    async fn save(&self, events: &[Event]) -> Result<usize, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
pub trait RecordStore: RecordWriter {
    /// Records with `timestamp_ms` in `[start_ms, end_ms]`, oldest first.
    async fn get_by_range(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Record>, StoreError>;

    /// Per-name counts for the period containing `anchor`, highest count first.
    async fn get_stats_by_period(
        &self,
        granularity: Granularity,
        anchor: NaiveDate,
    ) -> Result<Vec<KeyStat>, StoreError>;

    /// Per-day counts for days in `[first, last]` that have records.
    async fn get_daily_totals(
        &self,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Result<Vec<TrendPoint>, StoreError>;

    /// Per-month counts (`YYYY-MM`) for months of `year` that have records.
    async fn get_monthly_totals(&self, year: i32) -> Result<Vec<TrendPoint>, StoreError>;

    /// Per-hour counts (`00`..`23`) for one day, hours without records omitted.
    async fn get_hourly_totals(&self, day: NaiveDate) -> Result<Vec<TrendPoint>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;

    /// Delete every record. Backups are untouched.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Snapshot the store to a new file and register it.
    async fn backup(&self) -> Result<Backup, StoreError>;

    /// Replace the active record set with a snapshot's contents.
    async fn restore(&self, path: &Path) -> Result<(), StoreError>;

    /// Registered snapshots whose file still exists, newest first.
    async fn list_backups(&self) -> Result<Vec<Backup>, StoreError>;
}
