//! Ingestion buffer
//!
//! Absorbs high-frequency `add` calls into an in-memory queue and moves them
//! to the record store in batches.
//!
//! Flush triggers:
//! 1. Every `add` (when `flush_on_add` is set) as a fire-and-forget task
//! 2. Queue length reaching `flush_threshold`
//! 3. Periodic timer, regardless of queue size
//! 4. `stop()` - final flush before shutdown
//!
//! At most one flush runs at a time. A flush swaps the queue out before
//! writing, so events added meanwhile collect in a fresh queue. A batch that
//! still fails after the retry budget goes back to the *front* of the queue.

use crate::backoff::ExponentialBackoff;
use crate::store::RecordWriter;
use crate::types::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Notifications published after every flush attempt that wrote or requeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEvent {
    Flushed(usize),
    WriteFailed { count: usize, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush holds the gate
    InProgress,
    Empty,
    Flushed(usize),
    /// Retries exhausted; batch returned to the queue
    Requeued(usize),
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub flush_threshold: usize,
    pub flush_interval: Duration,
    pub flush_on_add: bool,
    /// Total write attempts per flush, first try included
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub channel_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 100,
            flush_interval: Duration::from_secs(1),
            flush_on_add: true,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            channel_capacity: 256,
        }
    }
}

type FlushObserver = Box<dyn Fn(usize) + Send + Sync>;

struct Shared {
    queue: Mutex<VecDeque<Event>>,
    flush_gate: tokio::sync::Mutex<()>,
    writer: Arc<dyn RecordWriter>,
    config: BufferConfig,
    events: broadcast::Sender<BufferEvent>,
    observers: Mutex<Vec<FlushObserver>>,
}

struct Timer {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

pub struct IngestionBuffer {
    shared: Arc<Shared>,
    timer: Mutex<Option<Timer>>,
}

impl IngestionBuffer {
    pub fn new(writer: Arc<dyn RecordWriter>, config: BufferConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));

        log::info!(
            "📥 Ingestion buffer ready ({} backend, threshold {}, interval {}ms, {} attempts)",
            writer.backend_type(),
            config.flush_threshold,
            config.flush_interval.as_millis(),
            config.max_attempts
        );

        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                flush_gate: tokio::sync::Mutex::new(()),
                writer,
                config,
                events,
                observers: Mutex::new(Vec::new()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Queue an event. Never waits on I/O.
    pub fn add(&self, event: Event) {
        if event.datetime().is_none() {
            log::warn!(
                "⚠️  Dropping event {} with unrepresentable timestamp {}",
                event.name,
                event.timestamp_ms
            );
            return;
        }

        let len = {
            let mut queue = self.shared.lock_queue();
            queue.push_back(event);
            queue.len()
        };

        if self.shared.config.flush_on_add || len >= self.shared.config.flush_threshold {
            self.spawn_flush();
        }
    }

    /// Write everything queued so far. Returns immediately if a flush is
    /// already running or the queue is empty.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Like `flush`, but waits for an in-flight flush instead of returning
    /// `InProgress`.
    pub async fn flush_wait(&self) -> FlushOutcome {
        self.pause().await.flush().await
    }

    /// Hold the flush gate. Until the guard drops, no timer, threshold or
    /// add-triggered flush can write; events keep queueing.
    pub async fn pause(&self) -> FlushGuard<'_> {
        FlushGuard {
            shared: &self.shared,
            _gate: self.shared.flush_gate.lock().await,
        }
    }

    /// Run `observer` with the batch size after every successful write,
    /// before the flush returns and before the broadcast goes out.
    pub fn on_flushed(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(observer));
    }

    pub fn size(&self) -> usize {
        self.shared.lock_queue().len()
    }

    /// Copy of the queued events, front first.
    pub fn pending(&self) -> Vec<Event> {
        self.shared.lock_queue().iter().cloned().collect()
    }

    /// Flush notifications and write failures.
    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.shared.events.subscribe()
    }

    /// Spawn the periodic flush timer. No-op if already running.
    pub fn start(&self) {
        let mut timer = self.lock_timer();
        if timer.is_some() {
            return;
        }

        let period = self.shared.config.flush_interval;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        if let FlushOutcome::Flushed(n) = shared.flush().await {
                            log::debug!("⏰ Timer flush wrote {} records", n);
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            log::debug!("⏰ Flush timer stopped");
        });

        *timer = Some(Timer { handle, shutdown });
        log::info!("⏰ Flush timer started (every {}ms)", period.as_millis());
    }

    /// Stop the timer, wait out any in-flight flush, then flush what is left.
    pub async fn stop(&self) -> FlushOutcome {
        let timer = self.lock_timer().take();
        if let Some(timer) = timer {
            let _ = timer.shutdown.send(());
            if let Err(e) = timer.handle.await {
                log::warn!("⚠️  Flush timer ended abnormally: {}", e);
            }
        }

        log::info!("🔄 Performing final flush...");
        let outcome = self.flush_wait().await;

        match outcome {
            FlushOutcome::Requeued(n) => {
                log::error!("❌ Final flush failed, {} records remain buffered", n)
            }
            _ => log::info!("✅ Final flush complete"),
        }
        outcome
    }

    fn spawn_flush(&self) {
        // Outside a runtime the timer (or stop) picks the events up
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = self.shared.clone();
        runtime.spawn(async move {
            shared.flush().await;
        });
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive hold on the flush gate, see [`IngestionBuffer::pause`].
pub struct FlushGuard<'a> {
    shared: &'a Shared,
    _gate: tokio::sync::MutexGuard<'a, ()>,
}

impl FlushGuard<'_> {
    /// Flush the queue while keeping the gate.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush_batch().await
    }
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn flush(&self) -> FlushOutcome {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return FlushOutcome::InProgress;
        };
        self.flush_batch().await
    }

    /// Caller must hold `flush_gate`.
    async fn flush_batch(&self) -> FlushOutcome {
        let batch: Vec<Event> = {
            let mut queue = self.lock_queue();
            if queue.is_empty() {
                return FlushOutcome::Empty;
            }
            std::mem::take(&mut *queue).into()
        };
        let count = batch.len();

        let mut backoff = ExponentialBackoff::new(
            self.config.retry_base_delay,
            self.config.retry_max_delay,
            self.config.max_attempts.saturating_sub(1),
        );

        let error = loop {
            match self.writer.save(&batch).await {
                Ok(_) => {
                    log::debug!("✅ Flushed {} records to {}", count, self.writer.backend_type());
                    self.notify_flushed(count);
                    let _ = self.events.send(BufferEvent::Flushed(count));
                    return FlushOutcome::Flushed(count);
                }
                Err(e) if e.is_retryable() => {
                    log::warn!("⚠️  Flush of {} records failed: {}", count, e);
                    if backoff.sleep().await.is_err() {
                        break e;
                    }
                }
                Err(e) => break e,
            }
        };

        self.requeue(batch);
        log::error!(
            "❌ Flush failed after {} attempts, {} records returned to queue: {}",
            backoff.attempts_used() + 1,
            count,
            error
        );
        let _ = self.events.send(BufferEvent::WriteFailed {
            count,
            error: error.to_string(),
        });
        FlushOutcome::Requeued(count)
    }

    fn notify_flushed(&self, count: usize) {
        let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer(count);
        }
    }

    /// Put a failed batch back ahead of anything added during the attempt.
    fn requeue(&self, batch: Vec<Event>) {
        let mut queue = self.lock_queue();
        for event in batch.into_iter().rev() {
            queue.push_front(event);
        }
    }
}
