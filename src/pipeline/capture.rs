//! Event capture: enrichment, sampling, buffering and ordered flushing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::clock::SharedClock;
use crate::events::{CapturedEvent, EventId, EventPayload, RawEvent};
use crate::pipeline::stats::SharedStats;
use crate::pipeline::transport::Transport;
use crate::session::SessionContext;

/// Invoked synchronously for every accepted event.
pub type CapturedHook = Arc<dyn Fn(&CapturedEvent) + Send + Sync>;

/// Batching settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Captures events and hands them to the transport in capture order.
///
/// Sampling is decided once per lifecycle. Unsampled events are still
/// accepted (they get an id and reach the captured hook) but never enter the
/// outbound buffer.
#[derive(Clone)]
pub struct EventPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    session: Arc<SessionContext>,
    sampled: bool,
    clock: SharedClock,
    transport: Arc<dyn Transport>,
    stats: SharedStats,
    settings: PipelineSettings,
    buffer: Mutex<VecDeque<CapturedEvent>>,
    /// Serializes drains and sends so batches leave in capture order
    send_lock: tokio::sync::Mutex<()>,
    on_captured: Mutex<Option<CapturedHook>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    runtime: Option<Handle>,
    closed: AtomicBool,
}

impl EventPipeline {
    pub fn new(
        session: Arc<SessionContext>,
        sampled: bool,
        clock: SharedClock,
        transport: Arc<dyn Transport>,
        stats: SharedStats,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                session,
                sampled,
                clock,
                transport,
                stats,
                settings,
                buffer: Mutex::new(VecDeque::new()),
                send_lock: tokio::sync::Mutex::new(()),
                on_captured: Mutex::new(None),
                ticker: Mutex::new(None),
                runtime: Handle::try_current().ok(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register the hook called for every accepted event.
    pub fn set_on_captured(&self, hook: CapturedHook) {
        *lock(&self.inner.on_captured) = Some(hook);
    }

    /// Start the periodic flush.
    pub fn start(&self) {
        let Some(runtime) = self.inner.runtime.as_ref() else {
            tracing::warn!("No async runtime; periodic flush disabled");
            return;
        };
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() {
            return;
        }

        let weak: Weak<PipelineInner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.flush_interval;
        *ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.has_buffered() {
                    inner.flush().await;
                }
            }
        }));
    }

    pub fn is_sampled(&self) -> bool {
        self.inner.sampled
    }

    /// Capture an event stamped with the current time.
    pub fn capture_event(
        &self,
        name: impl Into<String>,
        payload: EventPayload,
        flush_immediately: bool,
    ) -> Option<EventId> {
        let timestamp = self.inner.clock.now();
        self.capture(RawEvent::new(name, timestamp, payload), flush_immediately)
    }

    /// Capture a raw event, keeping its own timestamp.
    ///
    /// With `flush_immediately` the event is handed to the transport ahead of
    /// anything captured after it. Returns `None` once the pipeline is closed.
    pub fn capture(&self, raw: RawEvent, flush_immediately: bool) -> Option<EventId> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            tracing::debug!(name = %raw.name, "Pipeline closed; event ignored");
            return None;
        }

        let event = inner.enrich(raw);
        let event_id = event.event_id.clone();
        inner.stats.record_captured();
        inner.session.mark_activity(event.timestamp);

        let hook = lock(&inner.on_captured).clone();
        if let Some(hook) = hook {
            hook(&event);
        }

        if !inner.sampled {
            inner.stats.record_sampled_out();
            tracing::trace!(event_id = %event_id, "Event excluded by sampling");
            return Some(event_id);
        }

        let buffered = {
            let mut buffer = lock(&inner.buffer);
            buffer.push_back(event);
            buffer.len()
        };

        if flush_immediately || buffered >= inner.settings.batch_size {
            self.spawn_flush();
        }
        Some(event_id)
    }

    /// Send everything buffered so far. Returns the number of events drained.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    /// Stop the periodic flush and hand remaining events to the transport.
    ///
    /// The final send is spawned and not awaited. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ticker) = lock(&self.inner.ticker).take() {
            ticker.abort();
        }
        if self.inner.has_buffered() {
            self.spawn_flush();
        }
    }

    /// Flush and then shut down, waiting for the final send.
    pub async fn close(&self) {
        self.flush().await;
        self.shutdown();
    }

    fn spawn_flush(&self) {
        match self.inner.runtime.as_ref() {
            Some(runtime) => {
                let inner = Arc::clone(&self.inner);
                runtime.spawn(async move {
                    inner.flush().await;
                });
            }
            None => tracing::debug!("No async runtime; events stay buffered"),
        }
    }
}

impl PipelineInner {
    fn enrich(&self, raw: RawEvent) -> CapturedEvent {
        CapturedEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            kind: raw.kind,
            name: raw.name,
            timestamp: raw.timestamp,
            session_id: self.session.id().to_string(),
            anonymous_id: self.session.anonymous_id().to_string(),
            sampled: self.sampled,
            treatment: self.session.treatment(),
            payload: raw.payload,
        }
    }

    fn has_buffered(&self) -> bool {
        !lock(&self.buffer).is_empty()
    }

    async fn flush(&self) -> usize {
        let _send = self.send_lock.lock().await;
        let batch: Vec<CapturedEvent> = lock(&self.buffer).drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        for chunk in batch.chunks(self.settings.batch_size.max(1)) {
            match self.transport.send_batch(chunk).await {
                Ok(()) => {
                    self.stats.record_batch_sent(chunk.len() as u64);
                    tracing::debug!(count = chunk.len(), "Batch sent");
                }
                Err(e) => {
                    self.stats.record_batch_failed(chunk.len() as u64);
                    tracing::warn!(count = chunk.len(), "Failed to send batch: {}", e);
                }
            }
        }
        batch.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
