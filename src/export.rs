//! JSONL / CSV rendering of records and key breakdowns

use crate::error::StoreError;
use crate::types::{KeyStat, Record};
use chrono::DateTime;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

pub const RECORD_CSV_HEADER: &str = "id,code,name,timestampMs,date,time";
pub const KEY_STAT_CSV_HEADER: &str = "name,count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Jsonl,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExportData<'a> {
    Records(&'a [Record]),
    KeyStats(&'a [KeyStat]),
}

/// Render `data`, keeping only records with `timestamp_ms` in `[start, end]`
/// when a range is given. Key stats carry no timestamp and ignore the range.
///
/// Returns the number of rows written (header excluded).
pub fn write_export<W: Write>(
    out: &mut W,
    data: ExportData<'_>,
    format: ExportFormat,
    range: Option<(i64, i64)>,
) -> Result<usize, StoreError> {
    let in_range = |record: &&Record| match range {
        Some((start, end)) => record.timestamp_ms >= start && record.timestamp_ms <= end,
        None => true,
    };

    let mut rows = 0;
    match (data, format) {
        (ExportData::Records(records), ExportFormat::Jsonl) => {
            for record in records.iter().filter(in_range) {
                writeln!(out, "{}", serde_json::to_string(record)?)?;
                rows += 1;
            }
        }
        (ExportData::Records(records), ExportFormat::Csv) => {
            writeln!(out, "{}", RECORD_CSV_HEADER)?;
            for record in records.iter().filter(in_range) {
                let (date, time) = match DateTime::from_timestamp_millis(record.timestamp_ms) {
                    Some(dt) => (
                        dt.format("%Y-%m-%d").to_string(),
                        dt.format("%H:%M:%S").to_string(),
                    ),
                    None => (record.day_key.clone(), String::new()),
                };
                writeln!(
                    out,
                    "{},{},{},{},{},{}",
                    record.id,
                    record.code,
                    quote(&record.name),
                    record.timestamp_ms,
                    date,
                    time
                )?;
                rows += 1;
            }
        }
        (ExportData::KeyStats(stats), ExportFormat::Jsonl) => {
            for stat in stats {
                writeln!(out, "{}", serde_json::to_string(stat)?)?;
                rows += 1;
            }
        }
        (ExportData::KeyStats(stats), ExportFormat::Csv) => {
            writeln!(out, "{}", KEY_STAT_CSV_HEADER)?;
            for stat in stats {
                writeln!(out, "{},{}", quote(&stat.name), stat.count)?;
                rows += 1;
            }
        }
    }
    Ok(rows)
}

pub fn export_to_string(
    data: ExportData<'_>,
    format: ExportFormat,
    range: Option<(i64, i64)>,
) -> Result<String, StoreError> {
    let mut buf = Vec::new();
    write_export(&mut buf, data, format, range)?;
    String::from_utf8(buf)
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Write an export to `path`, creating parent directories as needed.
pub fn export_to_file(
    path: impl AsRef<Path>,
    data: ExportData<'_>,
    format: ExportFormat,
    range: Option<(i64, i64)>,
) -> Result<usize, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let rows = write_export(&mut writer, data, format, range)?;
    writer.flush()?;

    log::info!(
        "📝 Exported {} rows as {} to {}",
        rows,
        format.as_str(),
        path.display()
    );
    Ok(rows)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}
