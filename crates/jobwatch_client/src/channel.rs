use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use jobwatch_core::{JobKind, JobOutcome, ProgressEvent};
use jobwatch_logging::{watch_debug, watch_info, watch_trace, watch_warn};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backend::{ByteStream, JobBackend};
use crate::frames::{LineSplitter, SseFrame, SseParser};
use crate::types::{ChannelEvent, JobHandle, Transport, TransportError, TransportFailure};

pub type ChannelId = u64;

/// Receives every event a channel produces, in delivery order.
pub trait EventSink: Send + Sync {
    fn emit(&self, channel: ChannelId, event: ChannelEvent);
}

/// Opens job channels against one backend and tracks how many transports
/// are open across all of them.
#[derive(Clone)]
pub struct ChannelManager {
    backend: Arc<dyn JobBackend>,
    poll_interval: Duration,
    transports: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl ChannelManager {
    pub fn new(backend: Arc<dyn JobBackend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            // `tokio::time::interval` rejects a zero period.
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            transports: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Opens the primary push channel for `handle`; it degrades to polling on
    /// its own. Must be called from within a tokio runtime.
    pub fn open(&self, handle: &JobHandle, sink: Arc<dyn EventSink>) -> Channel {
        let (driver, channel_parts) = self.prepare(handle, Transport::Push, sink);
        self.spawn(channel_parts, driver.drive_push())
    }

    /// Follows a streaming-text start response as a log-only channel.
    pub fn open_text(&self, handle: &JobHandle, body: ByteStream, sink: Arc<dyn EventSink>) -> Channel {
        let (driver, channel_parts) = self.prepare(handle, Transport::TextStream, sink);
        self.spawn(channel_parts, driver.drive_text(body))
    }

    /// Number of push connections, poll timers and text streams currently open.
    pub fn open_transports(&self) -> usize {
        self.transports.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn prepare(
        &self,
        handle: &JobHandle,
        initial: Transport,
        sink: Arc<dyn EventSink>,
    ) -> (Driver, ChannelParts) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let transport = Arc::new(Mutex::new(initial));
        let driver = Driver {
            id,
            kind: handle.kind,
            job_id: handle.id.clone(),
            backend: self.backend.clone(),
            poll_interval: self.poll_interval,
            transports: self.transports.clone(),
            transport: transport.clone(),
            cancel: cancel.clone(),
            sink,
        };
        (driver, ChannelParts { id, cancel, transport })
    }

    fn spawn<F>(&self, parts: ChannelParts, work: F) -> Channel
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = parts.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = work => {}
            }
        });
        Channel {
            id: parts.id,
            cancel: parts.cancel,
            transport: parts.transport,
            task,
        }
    }
}

struct ChannelParts {
    id: ChannelId,
    cancel: CancellationToken,
    transport: Arc<Mutex<Transport>>,
}

/// A live-update channel for one job. Dropping it closes it.
pub struct Channel {
    id: ChannelId,
    cancel: CancellationToken,
    transport: Arc<Mutex<Transport>>,
    task: JoinHandle<()>,
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn transport(&self) -> Transport {
        *lock(&self.transport)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops delivery immediately and tears down the transport. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            watch_trace!("closing channel {}", self.id);
        }
        self.cancel.cancel();
        self.task.abort();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counts one open transport for as long as it lives.
struct TransportGuard(Arc<AtomicUsize>);

impl TransportGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Driver {
    id: ChannelId,
    kind: JobKind,
    job_id: String,
    backend: Arc<dyn JobBackend>,
    poll_interval: Duration,
    transports: Arc<AtomicUsize>,
    transport: Arc<Mutex<Transport>>,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
}

impl Driver {
    async fn drive_push(self) {
        let Err(err) = self.run_push().await else {
            return;
        };
        watch_warn!(
            "{} job {}: push channel lost ({}), polling every {:?}",
            self.kind,
            self.job_id,
            err,
            self.poll_interval
        );
        *lock(&self.transport) = Transport::Poll;
        if self.emit(ChannelEvent::Degraded {
            reason: err.to_string(),
        }) {
            self.run_poll().await;
        }
    }

    /// `Ok` once a terminal event was delivered; `Err` on any connection-level
    /// failure, including a stream that ends without one.
    async fn run_push(&self) -> Result<(), TransportError> {
        let _guard = TransportGuard::acquire(&self.transports);
        let mut stream = self.backend.open_stream(self.kind, &self.job_id).await?;
        watch_debug!("{} job {}: push channel connected", self.kind, self.job_id);

        let mut parser = SseParser::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for frame in parser.feed(&chunk) {
                if self.dispatch_frame(frame) {
                    return Ok(());
                }
            }
        }
        Err(TransportError::new(
            TransportFailure::StreamEnded,
            "stream closed before a terminal event",
        ))
    }

    /// Returns true when the frame ended the job.
    fn dispatch_frame(&self, frame: SseFrame) -> bool {
        let name = frame.event.as_deref().unwrap_or("progress");
        match name {
            "progress" => {
                self.emit(ChannelEvent::Progress(ProgressEvent::from_slice(
                    frame.data.as_bytes(),
                )));
                false
            }
            "done" => {
                self.finish(JobOutcome::Done, terminal_payload(&frame.data));
                true
            }
            "error" => {
                let message = failure_message(&frame.data);
                self.finish(JobOutcome::Failed { message }, terminal_payload(&frame.data));
                true
            }
            "cancelled" => {
                self.finish(JobOutcome::Cancelled, terminal_payload(&frame.data));
                true
            }
            other => {
                watch_debug!("{} job {}: ignoring `{}` event", self.kind, self.job_id, other);
                false
            }
        }
    }

    async fn run_poll(&self) {
        let _guard = TransportGuard::acquire(&self.transports);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.backend.poll_status(self.kind, &self.job_id).await {
                Ok(status) => match status.into_channel_event() {
                    ChannelEvent::Terminal { outcome, payload } => {
                        self.finish(outcome, payload);
                        return;
                    }
                    event => {
                        self.emit(event);
                    }
                },
                Err(err) if err.ends_polling() => {
                    watch_warn!("{} job {}: status unavailable: {}", self.kind, self.job_id, err);
                    self.finish(
                        JobOutcome::Failed {
                            message: format!("status unavailable: {err}"),
                        },
                        None,
                    );
                    return;
                }
                Err(err) => {
                    watch_debug!("{} job {}: poll failed, retrying: {}", self.kind, self.job_id, err);
                }
            }
        }
    }

    async fn drive_text(self, mut body: ByteStream) {
        let _guard = TransportGuard::acquire(&self.transports);
        let mut splitter = LineSplitter::default();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in splitter.feed(&bytes) {
                        self.emit(ChannelEvent::Line(line));
                    }
                }
                Err(err) => {
                    self.finish(
                        JobOutcome::Failed {
                            message: err.to_string(),
                        },
                        None,
                    );
                    return;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            self.emit(ChannelEvent::Line(line));
        }
        watch_info!("{} job {}: output stream finished", self.kind, self.job_id);
        self.finish(JobOutcome::Done, None);
    }

    /// Delivers `event` unless the channel was closed. Returns whether it did.
    /// A close racing the check may let one event through; the sink must
    /// drop events from channels it no longer holds.
    fn emit(&self, event: ChannelEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sink.emit(self.id, event);
        true
    }

    fn finish(&self, outcome: JobOutcome, payload: Option<ProgressEvent>) {
        self.emit(ChannelEvent::Terminal { outcome, payload });
        self.cancel.cancel();
    }
}

fn terminal_payload(data: &str) -> Option<ProgressEvent> {
    Some(ProgressEvent::from_slice(data.as_bytes())).filter(|event| !event.is_empty())
}

fn failure_message(data: &str) -> String {
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(data) {
        if let Some(message) = ["detail", "error", "message"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
        {
            return message.to_string();
        }
    }
    let text = data.trim();
    if text.is_empty() || text.starts_with('{') {
        "job reported an error".to_string()
    } else {
        text.to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
