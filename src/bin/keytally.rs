//! keytally runtime
//!
//! Reads events as JSON lines on stdin and feeds them to the tracker:
//!
//!   {"code":30,"name":"A","timestamp_ms":1700000000000}
//!
//! On EOF or CTRL+C the buffer is flushed and today's stats are printed to
//! stdout as JSON.
//!
//! Usage:
//!   some-input-hook | cargo run --release --bin keytally
//!
//! Environment variables (see `TrackerConfig::from_env`):
//!   KEYTALLY_DB_PATH - SQLite database path (default: keytally.db)
//!   KEYTALLY_FLUSH_INTERVAL_MS - Flush interval (default: 1000)
//!   RUST_LOG - Log filter (default: info)

use dotenv::dotenv;
use keytally::types::{utc_day, now_ms};
use keytally::{Event, FlushOutcome, Tracker, TrackerConfig};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = TrackerConfig::from_env();
    info!("🚀 keytally starting");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Flush: every {}ms or {} events", config.flush_interval_ms, config.flush_threshold);
    info!("   ├─ Retries: {} attempts, base {}ms", config.retry_attempts, config.retry_base_ms);
    info!("   └─ Cache TTL: {}s", config.cache_ttl_secs);

    let tracker = Tracker::open(&config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted: u64 = 0;
    let mut rejected: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Event>(line) {
                        Ok(event) => {
                            tracker.record(event);
                            accepted += 1;
                        }
                        Err(e) => {
                            rejected += 1;
                            warn!("⚠️  Skipping malformed event: {}", e);
                        }
                    }
                }
                Ok(None) => {
                    info!("📭 Input closed");
                    break;
                }
                Err(e) => {
                    error!("❌ Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️  Received CTRL+C, shutting down...");
                break;
            }
        }
    }

    info!("📊 Read {} events ({} malformed)", accepted, rejected);

    if let FlushOutcome::Requeued(n) = tracker.shutdown().await {
        error!("❌ {} events could not be written before exit", n);
    }

    if let Some(today) = utc_day(now_ms()) {
        let stats = tracker.daily_stats(today).await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    info!("✅ keytally stopped");
    Ok(())
}
