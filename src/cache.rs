//! Day/month/year rollups over the record store, memoized with a TTL.
//!
//! Entries are dropped wholesale whenever the ingestion buffer reports a
//! successful flush (see [`StatsCache::watch`]), so a query after a flush
//! always recomputes from the store.

use crate::buffer::BufferEvent;
use crate::error::StoreError;
use crate::store::RecordStore;
use crate::types::{
    day_key, days_in_month, epoch_day, month_key, now_ms, DayStats, Granularity, KeyStat,
    MonthStats, TrendPoint, YearStats,
};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at_ms: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, now_ms: i64, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            value,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Clone)]
enum CachedStats {
    Day(DayStats),
    Month(MonthStats),
    Year(YearStats),
}

pub struct StatsCache {
    store: Arc<dyn RecordStore>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<CachedStats>>>,
    /// Bumped by every clear; a computation that started before a clear is
    /// not stored.
    generation: AtomicU64,
    /// Wall clock at construction, advanced by the tokio clock
    origin: (Instant, i64),
}

impl StatsCache {
    pub fn new(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            origin: (Instant::now(), now_ms()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_daily_stats(&self, date: NaiveDate) -> Result<DayStats, StoreError> {
        let key = format!("daily:{}", epoch_day(date));
        if let Some(CachedStats::Day(stats)) = self.lookup(&key) {
            return Ok(stats);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let breakdown = self
            .store
            .get_stats_by_period(Granularity::Day, date)
            .await?;
        let hourly = self.store.get_hourly_totals(date).await?;
        let trend = zero_fill((0..24).map(|h| format!("{:02}", h)), hourly);

        let stats = DayStats {
            date,
            total_count: total(&breakdown),
            breakdown,
            trend,
        };
        self.insert(key, CachedStats::Day(stats.clone()), generation);
        Ok(stats)
    }

    pub async fn get_monthly_stats(&self, year: i32, month: u32) -> Result<MonthStats, StoreError> {
        if !(1..=12).contains(&month) {
            return Err(StoreError::InvalidPeriod(format!("month {} out of range", month)));
        }
        let days = days_in_month(year, month)
            .ok_or_else(|| StoreError::InvalidPeriod(format!("{}-{} unrepresentable", year, month)))?;
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| StoreError::InvalidPeriod(format!("{}-{} unrepresentable", year, month)))?;

        let key = format!("monthly:{}:{}", year, month);
        if let Some(CachedStats::Month(stats)) = self.lookup(&key) {
            return Ok(stats);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let breakdown = self
            .store
            .get_stats_by_period(Granularity::Month, first)
            .await?;
        let (_, last) = Granularity::Month.bounds(first);
        let daily = self.store.get_daily_totals(first, last).await?;
        let trend = zero_fill(
            (1..=days).filter_map(|d| first.with_day(d)).map(day_key),
            daily,
        );

        let stats = MonthStats {
            year,
            month,
            total_count: total(&breakdown),
            breakdown,
            trend,
        };
        self.insert(key, CachedStats::Month(stats.clone()), generation);
        Ok(stats)
    }

    pub async fn get_yearly_stats(&self, year: i32) -> Result<YearStats, StoreError> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| StoreError::InvalidPeriod(format!("year {} unrepresentable", year)))?;

        let key = format!("yearly:{}", year);
        if let Some(CachedStats::Year(stats)) = self.lookup(&key) {
            return Ok(stats);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let breakdown = self
            .store
            .get_stats_by_period(Granularity::Year, first)
            .await?;
        let monthly = self.store.get_monthly_totals(year).await?;
        let trend = zero_fill((1..=12).map(|m| month_key(year, m)), monthly);

        let stats = YearStats {
            year,
            total_count: total(&breakdown),
            breakdown,
            trend,
        };
        self.insert(key, CachedStats::Year(stats.clone()), generation);
        Ok(stats)
    }

    /// The `limit` most frequent names in the period containing `date`.
    pub async fn get_top_keys(
        &self,
        granularity: Granularity,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<KeyStat>, StoreError> {
        let mut breakdown = match granularity {
            Granularity::Day => self.get_daily_stats(date).await?.breakdown,
            Granularity::Month => {
                self.get_monthly_stats(date.year(), date.month())
                    .await?
                    .breakdown
            }
            Granularity::Year => self.get_yearly_stats(date.year()).await?.breakdown,
        };
        breakdown.truncate(limit);
        Ok(breakdown)
    }

    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = {
            let mut entries = self.lock_entries();
            let n = entries.len();
            entries.clear();
            n
        };
        if dropped > 0 {
            log::debug!("🧹 Dropped {} cached stats", dropped);
        }
    }

    /// Live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.now_ms();
        self.lock_entries()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries on every successful flush until the sender goes away.
    pub fn watch(self: &Arc<Self>, mut rx: broadcast::Receiver<BufferEvent>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = rx.recv().await;
                let Some(cache) = cache.upgrade() else { break };
                match event {
                    Ok(BufferEvent::Flushed(_)) => cache.clear_cache(),
                    Ok(BufferEvent::WriteFailed { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("⚠️  Cache watcher lagged by {} events", skipped);
                        cache.clear_cache();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("👋 Cache watcher exiting");
        })
    }

    fn now_ms(&self) -> i64 {
        let (instant, wall_ms) = self.origin;
        let elapsed = i64::try_from(instant.elapsed().as_millis()).unwrap_or(i64::MAX);
        wall_ms.saturating_add(elapsed)
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<CachedStats>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, key: &str) -> Option<CachedStats> {
        let now = self.now_ms();
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: String, value: CachedStats, generation: u64) {
        let entry = CacheEntry::new(value, self.now_ms(), self.ttl);
        let mut entries = self.lock_entries();
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(key, entry);
        }
    }
}

fn total(breakdown: &[KeyStat]) -> i64 {
    breakdown.iter().map(|stat| stat.count).sum()
}

/// One point per period label, counts taken from `sparse` or zero.
fn zero_fill(periods: impl Iterator<Item = String>, sparse: Vec<TrendPoint>) -> Vec<TrendPoint> {
    let counts: HashMap<String, i64> = sparse.into_iter().map(|p| (p.period, p.count)).collect();
    periods
        .map(|period| TrendPoint {
            count: counts.get(&period).copied().unwrap_or(0),
            period,
        })
        .collect()
}
