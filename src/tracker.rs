//! Tracker facade
//!
//! Owns one store, one ingestion buffer and one stats cache, and wires them:
//! - every successful flush invalidates the cache before the flush returns
//! - reset/restore are serialized behind a maintenance lock and hold the
//!   flush gate for their whole duration
//!
//! Must be built inside a tokio runtime (the flush timer and cache watcher
//! are spawned on construction).

use crate::buffer::{BufferEvent, FlushGuard, FlushOutcome, IngestionBuffer};
use crate::cache::StatsCache;
use crate::config::TrackerConfig;
use crate::error::{ConfigError, StoreError};
use crate::export::{export_to_file, ExportData, ExportFormat};
use crate::store::{RecordStore, SqliteRecordStore};
use crate::types::{Backup, DayStats, Event, Granularity, KeyStat, MonthStats, Record, YearStats};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct Tracker {
    store: Arc<dyn RecordStore>,
    buffer: IngestionBuffer,
    cache: Arc<StatsCache>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    maintenance: tokio::sync::Mutex<()>,
}

impl Tracker {
    /// Open the SQLite store at `config.db_path` and start ingesting.
    pub fn open(config: &TrackerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let store = Arc::new(SqliteRecordStore::open(&config.db_path)?);
        log::info!("✅ Store opened at {}", store.db_path().display());
        Ok(Self::with_store(store, config)?)
    }

    pub fn with_store<S: RecordStore + 'static>(
        store: Arc<S>,
        config: &TrackerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = IngestionBuffer::new(store.clone(), config.buffer_config());
        let cache = Arc::new(StatsCache::new(store.clone(), config.cache_ttl()));
        {
            let cache = Arc::downgrade(&cache);
            buffer.on_flushed(move |_| {
                if let Some(cache) = cache.upgrade() {
                    cache.clear_cache();
                }
            });
        }
        // Covers a lagged receiver; the observer above is what keeps reads fresh
        let watcher = cache.watch(buffer.subscribe());
        buffer.start();

        Ok(Self {
            store,
            buffer,
            cache,
            watcher: Mutex::new(Some(watcher)),
            maintenance: tokio::sync::Mutex::new(()),
        })
    }

    pub fn record(&self, event: Event) {
        self.buffer.add(event);
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.buffer.flush_wait().await
    }

    pub fn pending(&self) -> usize {
        self.buffer.size()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.buffer.subscribe()
    }

    pub fn cache(&self) -> &StatsCache {
        &self.cache
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub async fn daily_stats(&self, date: NaiveDate) -> Result<DayStats, StoreError> {
        self.cache.get_daily_stats(date).await
    }

    pub async fn monthly_stats(&self, year: i32, month: u32) -> Result<MonthStats, StoreError> {
        self.cache.get_monthly_stats(year, month).await
    }

    pub async fn yearly_stats(&self, year: i32) -> Result<YearStats, StoreError> {
        self.cache.get_yearly_stats(year).await
    }

    pub async fn top_keys(
        &self,
        granularity: Granularity,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<KeyStat>, StoreError> {
        self.cache.get_top_keys(granularity, date, limit).await
    }

    pub async fn records(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Record>, StoreError> {
        self.store.get_by_range(start_ms, end_ms).await
    }

    pub async fn backups(&self) -> Result<Vec<Backup>, StoreError> {
        self.store.list_backups().await
    }

    /// Flush, snapshot, then wipe the record set. The returned backup can be
    /// handed to [`Tracker::restore`].
    ///
    /// Aborts before touching the store if buffered events cannot be written.
    pub async fn reset(&self) -> Result<Backup, StoreError> {
        let _maintenance = self.maintenance.lock().await;
        let paused = self.buffer.pause().await;

        Self::flush_for_maintenance(&paused).await?;
        let backup = self.store.backup().await?;
        self.store.clear().await?;
        self.cache.clear_cache();

        log::info!("🔁 Reset complete, previous data in {}", backup.path);
        Ok(backup)
    }

    /// Replace the record set with a snapshot's contents.
    pub async fn restore(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let _maintenance = self.maintenance.lock().await;
        let paused = self.buffer.pause().await;

        Self::flush_for_maintenance(&paused).await?;
        let result = self.store.restore(path).await;
        self.cache.clear_cache();
        result?;

        log::info!("♻️  Restored records from {}", path.display());
        Ok(())
    }

    /// Export persisted records, optionally limited to `[start_ms, end_ms]`.
    pub async fn export_records(
        &self,
        path: impl AsRef<Path>,
        format: ExportFormat,
        range: Option<(i64, i64)>,
    ) -> Result<usize, StoreError> {
        let (start, end) = range.unwrap_or((i64::MIN, i64::MAX));
        let records = self.store.get_by_range(start, end).await?;
        export_to_file(path, ExportData::Records(&records), format, None)
    }

    /// Export the breakdown of the period containing `date`.
    pub async fn export_key_stats(
        &self,
        path: impl AsRef<Path>,
        format: ExportFormat,
        granularity: Granularity,
        date: NaiveDate,
    ) -> Result<usize, StoreError> {
        let stats = self.top_keys(granularity, date, usize::MAX).await?;
        export_to_file(path, ExportData::KeyStats(&stats), format, None)
    }

    /// Stop the timer, write what is buffered and detach the cache watcher.
    pub async fn shutdown(&self) -> FlushOutcome {
        let outcome = self.buffer.stop().await;

        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        log::info!("✅ Tracker stopped");
        outcome
    }

    async fn flush_for_maintenance(paused: &FlushGuard<'_>) -> Result<(), StoreError> {
        match paused.flush().await {
            FlushOutcome::Requeued(n) => Err(StoreError::WriteFailed(format!(
                "{} buffered events could not be flushed",
                n
            ))),
            _ => Ok(()),
        }
    }
}
