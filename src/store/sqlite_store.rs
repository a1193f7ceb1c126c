use crate::error::StoreError;
use crate::sqlite_pragma::apply_optimized_pragmas;
use crate::store::{RecordStore, RecordWriter};
use crate::types::{
    day_key, derive_calendar_fields, now_ms, Backup, Event, Granularity, KeyStat, Record,
    TrendPoint,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code INTEGER NOT NULL,
    name TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    day_key TEXT NOT NULL,
    hour_of_day INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_records_day_name ON records(day_key, name);

CREATE TABLE IF NOT EXISTS backups (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    created_at_ms INTEGER NOT NULL
);
"#;

/// SQLite-backed record store.
///
/// The connection is `None` only while a restore swaps the backing file (or
/// after a failed reopen); every operation then fails with `NotInitialized`.
pub struct SqliteRecordStore {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Self::open_connection(&db_path)?;
        log::info!("✅ Record store opened: {}", db_path.display());

        Ok(Self {
            db_path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(path)?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(StoreError::NotInitialized)?;
        f(conn)
    }

    /// `<dir>/<stem>.backup-<ms>.db`, suffixed `-N` until the name is free.
    fn next_backup_path(&self, created_at_ms: i64) -> PathBuf {
        let stem = self
            .db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "keytally".to_string());
        let dir = self.db_path.parent().unwrap_or_else(|| Path::new(""));

        let mut candidate = dir.join(format!("{}.backup-{}.db", stem, created_at_ms));
        let mut suffix = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{}.backup-{}-{}.db", stem, created_at_ms, suffix));
            suffix += 1;
        }
        candidate
    }

    /// Registered backups with their registration sequence, newest first.
    fn read_backup_rows(conn: &Connection) -> Result<Vec<(i64, Backup)>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT seq, path, created_at_ms FROM backups ORDER BY seq DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                Backup {
                    path: row.get(1)?,
                    created_at_ms: row.get(2)?,
                },
            ))
        })?;

        let mut backups = Vec::new();
        for row in rows {
            backups.push(row?);
        }
        Ok(backups)
    }

    fn query_key_stats(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<KeyStat>, StoreError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(KeyStat {
                name: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    fn query_trend(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TrendPoint>, StoreError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(TrendPoint {
                period: row.get(0)?,
                count: row.get(1)?,
            })
        })?;

        let mut points = Vec::new();
        for row in rows {
            points.push(row?);
        }
        Ok(points)
    }

    fn is_active_file(&self, path: &Path) -> bool {
        match (std::fs::canonicalize(path), std::fs::canonicalize(&self.db_path)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Swap the store file for the snapshot. Stale WAL/SHM files would be
    /// replayed over the snapshot on reopen, so they go first.
    fn replace_store_file(snapshot: &Path, db_path: &Path) -> Result<(), StoreError> {
        for ext in ["-wal", "-shm"] {
            let mut side = db_path.as_os_str().to_owned();
            side.push(ext);
            let side = PathBuf::from(side);
            if side.exists() {
                std::fs::remove_file(&side)?;
            }
        }
        std::fs::copy(snapshot, db_path)?;
        Ok(())
    }
}

#[async_trait]
impl RecordWriter for SqliteRecordStore {
    async fn save(&self, events: &[Event]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            let (day, hour) = derive_calendar_fields(event.timestamp_ms).ok_or_else(|| {
                StoreError::InvalidPeriod(format!("timestamp {} out of range", event.timestamp_ms))
            })?;
            rows.push((event, day, hour));
        }

        let write_failed = |e: rusqlite::Error| StoreError::WriteFailed(e.to_string());

        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(write_failed)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO records (code, name, timestamp_ms, day_key, hour_of_day)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(write_failed)?;

                for (event, day, hour) in &rows {
                    stmt.execute(params![event.code, event.name, event.timestamp_ms, day, hour])
                        .map_err(write_failed)?;
                }
            }
            tx.commit().map_err(write_failed)?;
            Ok(())
        })?;

        log::debug!("✅ Saved {} records", rows.len());
        Ok(rows.len())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_by_range(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Record>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, code, name, timestamp_ms, day_key, hour_of_day
                 FROM records
                 WHERE timestamp_ms BETWEEN ?1 AND ?2
                 ORDER BY timestamp_ms ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![start_ms, end_ms], |row| {
                Ok(Record {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    timestamp_ms: row.get(3)?,
                    day_key: row.get(4)?,
                    hour_of_day: row.get(5)?,
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    async fn get_stats_by_period(
        &self,
        granularity: Granularity,
        anchor: NaiveDate,
    ) -> Result<Vec<KeyStat>, StoreError> {
        let (first, last) = granularity.bounds(anchor);

        self.with_conn(|conn| match granularity {
            Granularity::Day => Self::query_key_stats(
                conn,
                "SELECT name, COUNT(*) AS cnt FROM records
                 WHERE day_key = ?1
                 GROUP BY name ORDER BY cnt DESC",
                &[&day_key(first)],
            ),
            // Range over day_key keeps month/year on the same index as day lookups
            Granularity::Month | Granularity::Year => Self::query_key_stats(
                conn,
                "SELECT name, COUNT(*) AS cnt FROM records
                 WHERE day_key BETWEEN ?1 AND ?2
                 GROUP BY name ORDER BY cnt DESC",
                &[&day_key(first), &day_key(last)],
            ),
        })
    }

    async fn get_daily_totals(
        &self,
        first: NaiveDate,
        last: NaiveDate,
    ) -> Result<Vec<TrendPoint>, StoreError> {
        self.with_conn(|conn| {
            Self::query_trend(
                conn,
                "SELECT day_key, COUNT(*) FROM records
                 WHERE day_key BETWEEN ?1 AND ?2
                 GROUP BY day_key ORDER BY day_key",
                &[&day_key(first), &day_key(last)],
            )
        })
    }

    async fn get_monthly_totals(&self, year: i32) -> Result<Vec<TrendPoint>, StoreError> {
        let first = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| StoreError::InvalidPeriod(format!("year {}", year)))?;
        let (first, last) = Granularity::Year.bounds(first);

        self.with_conn(|conn| {
            Self::query_trend(
                conn,
                "SELECT substr(day_key, 1, length(day_key) - 3) AS month, COUNT(*) FROM records
                 WHERE day_key BETWEEN ?1 AND ?2
                 GROUP BY month ORDER BY month",
                &[&day_key(first), &day_key(last)],
            )
        })
    }

    async fn get_hourly_totals(&self, day: NaiveDate) -> Result<Vec<TrendPoint>, StoreError> {
        self.with_conn(|conn| {
            Self::query_trend(
                conn,
                "SELECT printf('%02d', hour_of_day) AS hour, COUNT(*) FROM records
                 WHERE day_key = ?1
                 GROUP BY hour_of_day ORDER BY hour_of_day",
                &[&day_key(day)],
            )
        })
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let deleted = self.with_conn(|conn| Ok(conn.execute("DELETE FROM records", [])?))?;
        log::info!("🧹 Cleared {} records", deleted);
        Ok(())
    }

    async fn backup(&self) -> Result<Backup, StoreError> {
        let backup = self.with_conn(|conn| {
            let created_at_ms = now_ms();
            let path = self.next_backup_path(created_at_ms);
            let path_str = path.to_string_lossy().into_owned();

            // File first, metadata second: a crash in between leaves an
            // unlisted file, never a listed backup without its file.
            conn.execute("VACUUM INTO ?1", params![path_str])?;
            conn.execute(
                "INSERT INTO backups (path, created_at_ms) VALUES (?1, ?2)",
                params![path_str, created_at_ms],
            )?;

            Ok(Backup {
                path: path_str,
                created_at_ms,
            })
        })?;

        log::info!("💾 Backup written: {}", backup.path);
        Ok(backup)
    }

    async fn restore(&self, path: &Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Err(StoreError::BackupNotFound(path.to_path_buf()));
        }

        // Copying the live file onto itself would truncate it
        if self.is_active_file(path) {
            log::warn!("⚠️  {} is the active store, nothing to restore", path.display());
            return Ok(());
        }

        let mut guard = self.lock()?;

        // Snapshots predate later backups; carry the registry across the swap
        let known_backups = match guard.as_ref() {
            Some(conn) => Self::read_backup_rows(conn)?,
            None => Vec::new(),
        };

        if let Some(conn) = guard.take() {
            if let Err((conn, e)) = conn.close() {
                *guard = Some(conn);
                return Err(e.into());
            }
        }

        log::info!("♻️  Restoring store from {}", path.display());
        let replaced = Self::replace_store_file(path, &self.db_path);

        // Reopen whatever is on disk now, even if the copy failed
        let conn = Self::open_connection(&self.db_path)?;
        {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO backups (seq, path, created_at_ms) VALUES (?1, ?2, ?3)",
            )?;
            for (seq, backup) in &known_backups {
                stmt.execute(params![seq, backup.path, backup.created_at_ms])?;
            }
        }
        *guard = Some(conn);
        replaced?;

        log::info!("✅ Store restored from {}", path.display());
        Ok(())
    }

    async fn list_backups(&self) -> Result<Vec<Backup>, StoreError> {
        let backups = self.with_conn(|conn| Self::read_backup_rows(conn))?;
        Ok(backups
            .into_iter()
            .map(|(_, backup)| backup)
            .filter(|b| Path::new(&b.path).exists())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::month_key;
    use tempfile::tempdir;

    fn ev(name: &str, timestamp_ms: i64) -> Event {
        Event::new(65, name, timestamp_ms)
    }

    fn sorted_events(records: &[Record]) -> Vec<Event> {
        let mut events: Vec<Event> = records.iter().map(Record::to_event).collect();
        events.sort_by(|a, b| (a.timestamp_ms, &a.name).cmp(&(b.timestamp_ms, &b.name)));
        events
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_range_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        let mut batch = vec![
            ev("B", 1_700_000_002_000),
            ev("A", 1_700_000_000_000),
            ev("A", 1_700_000_000_000),
            ev("Space", 1_700_000_001_000),
        ];
        assert_eq!(store.save(&batch).await.unwrap(), 4);

        let records = store
            .get_by_range(1_700_000_000_000, 1_700_000_002_000)
            .await
            .unwrap();
        assert_eq!(records.len(), 4);

        // Ascending by timestamp
        for pair in records.windows(2) {
            assert!(pair[0].timestamp_ms <= pair[1].timestamp_ms);
        }

        batch.sort_by(|a, b| (a.timestamp_ms, &a.name).cmp(&(b.timestamp_ms, &b.name)));
        assert_eq!(sorted_events(&records), batch);

        // Derived fields
        assert!(records.iter().all(|r| r.day_key == "2023-11-14" && r.hour_of_day == 22));
    }

    #[tokio::test]
    async fn test_range_is_inclusive() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store
            .save(&[ev("A", 100), ev("B", 200), ev("C", 300)])
            .await
            .unwrap();

        let records = store.get_by_range(100, 200).await.unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);

        assert!(store.get_by_range(301, 400).await.unwrap().is_empty());
        assert!(store.get_by_range(300, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_save_is_noop() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        assert_eq!(store.save(&[]).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("keys.db");
        let store = SqliteRecordStore::open(&db_path).unwrap();

        // Reject one row of the batch from inside SQLite
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON records
             WHEN NEW.name = 'BAD'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        drop(conn);

        let result = store
            .save(&[ev("A", 1_000), ev("B", 2_000), ev("BAD", 3_000)])
            .await;
        assert!(matches!(result, Err(StoreError::WriteFailed(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("keys.db");

        let batch = vec![ev("A", 1_700_000_000_000), ev("Enter", 1_700_000_500_000)];
        {
            let store = SqliteRecordStore::open(&db_path).unwrap();
            store.save(&batch).await.unwrap();
        }

        let store = SqliteRecordStore::open(&db_path).unwrap();
        let records = store.get_by_range(0, i64::MAX).await.unwrap();
        assert_eq!(sorted_events(&records), batch);
    }

    #[tokio::test]
    async fn test_day_stats_split_at_utc_midnight() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store
            .save(&[
                ev("A", 1_700_000_000_000),
                ev("A", 1_700_003_600_000),
                ev("B", 1_700_007_200_000),
            ])
            .await
            .unwrap();

        // 1_700_007_200_000 is 2023-11-15T00:13:20Z, so only the A's land on the 14th
        let stats = store
            .get_stats_by_period(Granularity::Day, date(2023, 11, 14))
            .await
            .unwrap();
        assert_eq!(
            stats,
            vec![KeyStat {
                name: "A".to_string(),
                count: 2
            }]
        );

        let month = store
            .get_stats_by_period(Granularity::Month, date(2023, 11, 30))
            .await
            .unwrap();
        assert_eq!(month.len(), 2);
        assert_eq!(month[0].name, "A");
        assert_eq!(month[0].count, 2);
        assert_eq!(month[1].count, 1);
    }

    #[tokio::test]
    async fn test_period_boundaries_are_inclusive() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        // 2024-01-31T23:59:59.999Z, 2024-02-01T00:00:00Z, 2024-02-29T23:59:59.999Z, 2024-03-01T00:00:00Z
        store
            .save(&[
                ev("Jan", 1_706_745_599_999),
                ev("Feb", 1_706_745_600_000),
                ev("Feb", 1_709_251_199_999),
                ev("Mar", 1_709_251_200_000),
            ])
            .await
            .unwrap();

        let feb = store
            .get_stats_by_period(Granularity::Month, date(2024, 2, 10))
            .await
            .unwrap();
        assert_eq!(
            feb,
            vec![KeyStat {
                name: "Feb".to_string(),
                count: 2
            }]
        );

        let year = store
            .get_stats_by_period(Granularity::Year, date(2024, 7, 1))
            .await
            .unwrap();
        assert_eq!(year.iter().map(|s| s.count).sum::<i64>(), 4);
        assert_eq!(year[0].name, "Feb");

        let totals = store.get_monthly_totals(2024).await.unwrap();
        let periods: Vec<(&str, i64)> = totals.iter().map(|p| (p.period.as_str(), p.count)).collect();
        assert_eq!(periods, vec![("2024-01", 1), ("2024-02", 2), ("2024-03", 1)]);
    }

    #[tokio::test]
    async fn test_hourly_totals_use_utc_hour() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store
            .save(&[
                ev("A", 1_700_000_000_000),
                ev("B", 1_700_000_100_000),
                ev("C", 1_699_920_000_000),
            ])
            .await
            .unwrap();

        let hours = store.get_hourly_totals(date(2023, 11, 14)).await.unwrap();
        let periods: Vec<(&str, i64)> = hours.iter().map(|p| (p.period.as_str(), p.count)).collect();
        assert_eq!(periods, vec![("00", 1), ("22", 2)]);
    }

    #[tokio::test]
    async fn test_stats_sorted_by_count_desc() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        let mut batch = Vec::new();
        for (i, (name, n)) in [("E", 5), ("T", 9), ("A", 1), ("O", 7), ("I", 7)]
            .iter()
            .enumerate()
        {
            for j in 0..*n {
                batch.push(ev(name, 1_700_000_000_000 + (i * 100 + j) as i64));
            }
        }
        store.save(&batch).await.unwrap();

        let stats = store
            .get_stats_by_period(Granularity::Day, date(2023, 11, 14))
            .await
            .unwrap();
        assert_eq!(stats.len(), 5);
        assert_eq!(stats[0].name, "T");
        assert_eq!(stats.iter().map(|s| s.count).sum::<i64>(), 29);
        for pair in stats.windows(2) {
            assert!(pair[0].count >= pair[1].count);
        }
    }

    #[tokio::test]
    async fn test_clear_then_save_yields_only_new_records() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store
            .save(&[ev("A", 1_700_000_000_000), ev("B", 1_700_000_000_001)])
            .await
            .unwrap();

        store.clear().await.unwrap();
        for g in [Granularity::Day, Granularity::Month, Granularity::Year] {
            let stats = store.get_stats_by_period(g, date(2023, 11, 14)).await.unwrap();
            assert!(stats.is_empty());
        }

        store
            .save(&[ev("C", 1_700_000_000_000), ev("D", 1_700_000_000_001), ev("E", 1)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_backup_clear_restore_round_trip() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        let batch = vec![
            ev("A", 1_700_000_000_000),
            ev("B", 1_700_000_000_500),
            ev("A", 1_700_086_400_000),
        ];
        store.save(&batch).await.unwrap();
        let before = store.get_by_range(0, i64::MAX).await.unwrap();

        let backup = store.backup().await.unwrap();
        assert!(Path::new(&backup.path).exists());

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        store.restore(Path::new(&backup.path)).await.unwrap();
        let after = store.get_by_range(0, i64::MAX).await.unwrap();
        assert_eq!(after, before);

        // Snapshot survives its own restore and is still listed
        let listed = store.list_backups().await.unwrap();
        assert_eq!(listed, vec![backup]);
    }

    #[tokio::test]
    async fn test_restore_missing_backup() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store.save(&[ev("A", 1)]).await.unwrap();

        let missing = dir.path().join("nope.db");
        match store.restore(&missing).await {
            Err(StoreError::BackupNotFound(p)) => assert_eq!(p, missing),
            other => panic!("expected BackupNotFound, got {:?}", other),
        }

        // Active state untouched
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backup_paths_unique_and_listed_newest_first() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store.save(&[ev("A", 1)]).await.unwrap();

        let first = store.backup().await.unwrap();
        let second = store.backup().await.unwrap();
        let third = store.backup().await.unwrap();
        assert_ne!(first.path, second.path);
        assert_ne!(second.path, third.path);
        assert!(first.path.contains("keys.backup-"));

        let listed = store.list_backups().await.unwrap();
        assert_eq!(listed, vec![third.clone(), second.clone(), first.clone()]);

        // Deleted snapshot files drop out of the listing
        std::fs::remove_file(&second.path).unwrap();
        let listed = store.list_backups().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|b| b.path != second.path));
    }

    #[tokio::test]
    async fn test_backups_survive_clear() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store.save(&[ev("A", 1)]).await.unwrap();

        let backup = store.backup().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.list_backups().await.unwrap(), vec![backup]);
    }

    #[tokio::test]
    async fn test_closed_store_reports_not_initialized() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store.lock().unwrap().take();

        assert!(matches!(store.count().await, Err(StoreError::NotInitialized)));
        assert!(matches!(
            store.save(&[ev("A", 1)]).await,
            Err(StoreError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_same_millisecond_backups_listed_by_registration() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        let names = [
            "keys.backup-1700000000000.db",
            "keys.backup-1700000000000-1.db",
            "keys.backup-1700000000000-2.db",
        ];
        let paths: Vec<String> = names
            .iter()
            .map(|name| dir.path().join(name).to_string_lossy().into_owned())
            .collect();
        store
            .with_conn(|conn| {
                for path in &paths {
                    std::fs::write(path, b"").unwrap();
                    conn.execute(
                        "INSERT INTO backups (path, created_at_ms) VALUES (?1, ?2)",
                        params![path, 1_700_000_000_000i64],
                    )?;
                }
                Ok(())
            })
            .unwrap();

        let listed: Vec<String> = store
            .list_backups()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.path)
            .collect();
        assert_eq!(listed, vec![paths[2].clone(), paths[1].clone(), paths[0].clone()]);
    }

    #[tokio::test]
    async fn test_backup_order_survives_restore() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();
        store.save(&[ev("A", 1)]).await.unwrap();

        let first = store.backup().await.unwrap();
        let second = store.backup().await.unwrap();
        store.restore(Path::new(&first.path)).await.unwrap();
        let third = store.backup().await.unwrap();

        assert_eq!(store.list_backups().await.unwrap(), vec![third, second, first]);
    }

    #[tokio::test]
    async fn test_restore_onto_active_file_keeps_data() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("keys.db");
        let store = SqliteRecordStore::open(&db_path).unwrap();
        store.save(&[ev("A", 1), ev("B", 2)]).await.unwrap();

        store.restore(&db_path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        // Same file through a different spelling
        let roundabout = dir.path().join(".").join("keys.db");
        store.restore(&roundabout).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_monthly_totals_outside_four_digit_years() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("keys.db")).unwrap();

        let bc = NaiveDate::from_ymd_opt(-1, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        let far = NaiveDate::from_ymd_opt(10_000, 11, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        store.save(&[ev("A", bc), ev("B", far)]).await.unwrap();

        let totals = store.get_monthly_totals(-1).await.unwrap();
        assert_eq!(totals, vec![TrendPoint { period: month_key(-1, 3), count: 1 }]);

        let totals = store.get_monthly_totals(10_000).await.unwrap();
        assert_eq!(totals, vec![TrendPoint { period: month_key(10_000, 11), count: 1 }]);
    }
}
