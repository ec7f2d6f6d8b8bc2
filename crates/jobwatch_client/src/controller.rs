use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use jobwatch_core::{
    apply, finish, JobKind, JobOutcome, LineKind, LogSink, ProgressModel, ProgressView,
    TerminalLine,
};
use jobwatch_logging::{watch_info, watch_trace, watch_warn};
use tokio::sync::watch;

use crate::backend::{JobBackend, LaunchResponse};
use crate::channel::{Channel, ChannelId, ChannelManager, EventSink};
use crate::types::{
    CancelError, ChannelEvent, ControllerState, JobHandle, JobParams, LaunchError, Transport,
};

/// What observers see after every controller change.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSnapshot {
    pub kind: JobKind,
    pub state: ControllerState,
    pub handle: Option<JobHandle>,
    pub view: ProgressView,
    pub outcome: Option<JobOutcome>,
    /// Total lines in the job log so far.
    pub lines: usize,
}

struct Inner {
    state: ControllerState,
    handle: Option<JobHandle>,
    /// Server-assigned id, when there is one to cancel.
    remote_id: Option<String>,
    model: ProgressModel,
    log: LogSink,
    channel: Option<Channel>,
}

/// Drives one job from launch to disposal.
///
/// The controller owns the progress model and log for its job. A server
/// outcome closes the channel and leaves the controller `Terminal`; `cancel`
/// and `dispose` release it to `Disposed`. No event changes the model once
/// either state is reached.
pub struct JobController {
    kind: JobKind,
    backend: Arc<dyn JobBackend>,
    channels: ChannelManager,
    inner: Mutex<Inner>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl JobController {
    pub fn new(
        kind: JobKind,
        backend: Arc<dyn JobBackend>,
        channels: ChannelManager,
        heartbeat_interval: Duration,
    ) -> Arc<Self> {
        let inner = Inner {
            state: ControllerState::Idle,
            handle: None,
            remote_id: None,
            model: ProgressModel::new(),
            log: LogSink::new(heartbeat_interval),
            channel: None,
        };
        let (snapshot_tx, _) = watch::channel(snapshot_of(kind, &inner));
        Arc::new(Self {
            kind,
            backend,
            channels,
            inner: Mutex::new(inner),
            snapshot_tx,
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> ControllerState {
        self.lock().state.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().state == ControllerState::Disposed
    }

    pub fn is_finished(&self) -> bool {
        self.lock().state.is_finished()
    }

    pub fn handle(&self) -> Option<JobHandle> {
        self.lock().handle.clone()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.lock().channel.as_ref().map(Channel::id)
    }

    pub fn transport(&self) -> Option<Transport> {
        self.lock().channel.as_ref().map(Channel::transport)
    }

    pub fn model(&self) -> ProgressModel {
        self.lock().model.clone()
    }

    pub fn lines(&self) -> Vec<TerminalLine> {
        self.lock().log.lines().to_vec()
    }

    pub fn line_count(&self, kind: LineKind) -> usize {
        self.lock().log.count(kind)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        snapshot_of(self.kind, &self.lock())
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Resolves once the job is terminal or the controller disposed. Never
    /// resolves for a controller that is never started or disposed.
    pub async fn wait_finished(&self) -> ControllerSnapshot {
        let mut rx = self.snapshot_tx.subscribe();
        let finished = rx
            .wait_for(|snapshot| snapshot.state.is_finished())
            .await
            .map(|snapshot| (*snapshot).clone());
        finished.unwrap_or_else(|_| self.snapshot())
    }

    /// Launches the job and attaches the primary channel.
    pub async fn start(self: &Arc<Self>, params: JobParams) -> Result<JobHandle, LaunchError> {
        {
            let mut inner = self.lock();
            if inner.state != ControllerState::Idle {
                return Err(LaunchError::AlreadyStarted);
            }
            inner.state = ControllerState::Launching;
            inner.model = ProgressModel::new();
            inner.log.clear();
            self.publish(&inner);
        }
        watch_info!("launching {} job", self.kind);

        let response = match self.backend.start(self.kind, &params).await {
            Ok(response) => response,
            Err(err) => {
                watch_warn!("{} launch failed: {}", self.kind, err);
                let mut inner = self.lock();
                if inner.state == ControllerState::Launching {
                    inner.state = ControllerState::Disposed;
                    self.publish(&inner);
                }
                return Err(err);
            }
        };

        match self.attach(response) {
            Ok(handle) => Ok(handle),
            Err(orphan) => {
                self.abandon(orphan).await;
                Err(LaunchError::Aborted)
            }
        }
    }

    /// Opens the channel for a launch response. Hands the response back when
    /// the controller was disposed while the launch was in flight.
    fn attach(self: &Arc<Self>, response: LaunchResponse) -> Result<JobHandle, LaunchResponse> {
        let mut inner = self.lock();
        if inner.state != ControllerState::Launching {
            return Err(response);
        }

        let (job_id, remote_id, text_body) = match response {
            LaunchResponse::Job { job_id } => (job_id.clone(), Some(job_id), None),
            LaunchResponse::TextStream { job_id, body } => {
                let local = job_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                (local, job_id, Some(body))
            }
        };
        let handle = JobHandle {
            id: job_id,
            kind: self.kind,
            started_at: Utc::now(),
        };
        let sink: Arc<dyn EventSink> = Arc::new(ControllerSink(Arc::downgrade(self)));
        let channel = match text_body {
            None => self.channels.open(&handle, sink),
            Some(body) => self.channels.open_text(&handle, body, sink),
        };

        let before = inner.log.lines().len();
        let transport = channel.transport();
        inner.log.record(
            Instant::now(),
            LineKind::Notice,
            format!("{} job {} started ({transport})", self.kind, handle.id),
        );
        inner.state = ControllerState::Active(transport);
        inner.handle = Some(handle.clone());
        inner.remote_id = remote_id;
        inner.channel = Some(channel);
        self.mirror(&inner, before);
        self.publish(&inner);
        Ok(handle)
    }

    /// Best-effort cancel of a job the server started for a controller that
    /// is already gone. Local state is left alone.
    async fn abandon(&self, response: LaunchResponse) {
        let job_id = match response {
            LaunchResponse::Job { job_id } => Some(job_id),
            LaunchResponse::TextStream { job_id, .. } => job_id,
        };
        let Some(job_id) = job_id else {
            watch_warn!(
                "{} job launched after its controller was disposed; no id to cancel",
                self.kind
            );
            return;
        };
        watch_warn!(
            "{} job {} launched after its controller was disposed; cancelling it",
            self.kind,
            job_id
        );
        if let Err(err) = self.backend.cancel(self.kind, &job_id).await {
            watch_warn!("{} job {}: {}", self.kind, job_id, err);
        }
    }

    /// The single dispatch point for channel events.
    ///
    /// Events from a channel other than the current one, or arriving after a
    /// terminal transition, are dropped.
    pub fn handle_event(&self, channel: ChannelId, event: ChannelEvent) {
        let now = Instant::now();
        let mut inner = self.lock();
        let current = inner.channel.as_ref().map(Channel::id);
        if current != Some(channel) || !matches!(inner.state, ControllerState::Active(_)) {
            watch_trace!("{}: dropping stale event from channel {}", self.kind, channel);
            return;
        }

        let before = inner.log.lines().len();
        let Inner {
            state, model, log, ..
        } = &mut *inner;
        match event {
            ChannelEvent::Progress(event) => {
                let (next, transitions) = apply(std::mem::take(model), &event);
                *model = next;
                log.observe(now, model, &transitions);
            }
            ChannelEvent::Degraded { reason } => {
                *state = ControllerState::Active(Transport::Poll);
                log.record(
                    now,
                    LineKind::Channel,
                    format!("live updates lost ({reason}); polling for status"),
                );
            }
            ChannelEvent::Line(text) => log.record(now, LineKind::Output, text),
            ChannelEvent::Terminal { outcome, payload } => {
                let (next, transitions) =
                    finish(std::mem::take(model), payload.as_ref(), outcome.clone());
                *model = next;
                log.observe(now, model, &transitions);
                *state = ControllerState::Terminal(outcome);
            }
        }

        if matches!(inner.state, ControllerState::Terminal(_)) {
            close_channel(&mut inner);
        }
        self.mirror(&inner, before);
        self.publish(&inner);
    }

    /// Stops the job locally, then asks the server to stop it too.
    ///
    /// Local disposal does not wait for the request; an error only reports
    /// that the server may still be running the job.
    pub async fn cancel(&self) -> Result<(), CancelError> {
        let remote_id = {
            let mut inner = self.lock();
            if inner.state == ControllerState::Disposed {
                return Ok(());
            }
            if matches!(inner.state, ControllerState::Terminal(_)) {
                release(&mut inner);
                self.publish(&inner);
                return Ok(());
            }
            let before = inner.log.lines().len();
            let remote_id = inner.remote_id.clone();
            let Inner { model, log, .. } = &mut *inner;
            let (next, transitions) = finish(std::mem::take(model), None, JobOutcome::Cancelled);
            *model = next;
            log.observe(Instant::now(), model, &transitions);
            release(&mut inner);
            self.mirror(&inner, before);
            self.publish(&inner);
            remote_id
        };

        let Some(job_id) = remote_id else {
            return Ok(());
        };
        match self.backend.cancel(self.kind, &job_id).await {
            Ok(()) => {
                watch_info!("{} job {}: cancel acknowledged", self.kind, job_id);
                Ok(())
            }
            Err(err) => {
                watch_warn!("{} job {}: {}", self.kind, job_id, err);
                Err(err)
            }
        }
    }

    /// Closes the channel and drops the job handle. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.state == ControllerState::Disposed {
            return;
        }
        let before = inner.log.lines().len();
        if matches!(inner.state, ControllerState::Active(_)) {
            inner
                .log
                .record(Instant::now(), LineKind::Notice, "stopped following job");
        }
        release(&mut inner);
        self.mirror(&inner, before);
        self.publish(&inner);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot_tx.send_replace(snapshot_of(self.kind, inner));
    }

    /// Forwards lines recorded since `before` to the global logger.
    fn mirror(&self, inner: &Inner, before: usize) {
        for line in inner.log.lines().iter().skip(before) {
            watch_info!("[{}] {}", self.kind, line.text);
        }
    }
}

fn close_channel(inner: &mut Inner) {
    if let Some(channel) = inner.channel.take() {
        channel.close();
    }
    inner.remote_id = None;
}

fn release(inner: &mut Inner) {
    close_channel(inner);
    inner.handle = None;
    inner.state = ControllerState::Disposed;
}

fn snapshot_of(kind: JobKind, inner: &Inner) -> ControllerSnapshot {
    ControllerSnapshot {
        kind,
        state: inner.state.clone(),
        handle: inner.handle.clone(),
        view: inner.model.view(),
        outcome: inner.model.outcome().cloned(),
        lines: inner.log.lines().len(),
    }
}

/// Routes channel events back to a controller without keeping it alive.
struct ControllerSink(Weak<JobController>);

impl EventSink for ControllerSink {
    fn emit(&self, channel: ChannelId, event: ChannelEvent) {
        if let Some(controller) = self.0.upgrade() {
            controller.handle_event(channel, event);
        }
    }
}
