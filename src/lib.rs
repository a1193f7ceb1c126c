//! keytally: buffered event ingestion into SQLite with cached day/month/year
//! rollups, backup/restore and JSONL/CSV export.

pub mod backoff;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod sqlite_pragma;
pub mod store;
pub mod tracker;
pub mod types;

pub use buffer::{BufferConfig, BufferEvent, FlushGuard, FlushOutcome, IngestionBuffer};
pub use cache::StatsCache;
pub use config::TrackerConfig;
pub use error::{ConfigError, StoreError};
pub use store::{RecordStore, RecordWriter, SqliteRecordStore};
pub use tracker::Tracker;
pub use types::{Backup, DayStats, Event, Granularity, KeyStat, MonthStats, Record, YearStats};
