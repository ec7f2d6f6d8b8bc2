use std::fmt;

use chrono::{DateTime, Utc};
use jobwatch_core::{JobKind, JobOutcome, ProgressEvent};
use thiserror::Error;

/// Identity of a launched job. Lives from a successful launch until dispose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
}

/// Parameters forwarded to the start endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobParams {
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Push,
    Poll,
    TextStream,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Push => write!(f, "push"),
            Transport::Poll => write!(f, "poll"),
            Transport::TextStream => write!(f, "text stream"),
        }
    }
}

/// Everything a channel can tell its consumer, as one dispatchable type.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Progress(ProgressEvent),
    Terminal {
        outcome: JobOutcome,
        payload: Option<ProgressEvent>,
    },
    /// The push transport failed; the channel continues by polling.
    Degraded { reason: String },
    /// One line of output from a streaming-text job.
    Line(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Idle,
    Launching,
    Active(Transport),
    /// The job ended; the channel is closed but the handle is still held.
    Terminal(JobOutcome),
    Disposed,
}

impl ControllerState {
    /// No further event can change the controller.
    pub fn is_finished(&self) -> bool {
        matches!(self, ControllerState::Terminal(_) | ControllerState::Disposed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportFailure,
    pub message: String,
}

impl TransportError {
    pub(crate) fn new(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Poll failures that retrying cannot fix.
    pub fn ends_polling(&self) -> bool {
        matches!(
            self.kind,
            TransportFailure::HttpStatus(404) | TransportFailure::NotConfigured | TransportFailure::InvalidUrl
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    StreamEnded,
    Decode,
    NotConfigured,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::InvalidUrl => write!(f, "invalid url"),
            TransportFailure::HttpStatus(code) => write!(f, "http status {code}"),
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::Network => write!(f, "network error"),
            TransportFailure::StreamEnded => write!(f, "stream ended"),
            TransportFailure::Decode => write!(f, "undecodable response"),
            TransportFailure::NotConfigured => write!(f, "endpoint not configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("a {kind} job is already running: {detail}")]
    Conflict { kind: JobKind, detail: String },
    #[error("launch rejected with http status {status}: {detail}")]
    HttpStatus { status: u16, detail: String },
    #[error("launch request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("launch response did not contain a job id")]
    MissingJobId,
    #[error("controller has already been started")]
    AlreadyStarted,
    #[error("controller was disposed before the launch completed")]
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("cancel request failed: {0}")]
    Request(#[from] TransportError),
}
