use std::collections::BTreeMap;
use std::time::Duration;

use jobwatch_core::{JobKind, DEFAULT_HEARTBEAT_INTERVAL};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Named events over `text/event-stream`, falling back to status polls.
    PushWithPollFallback,
    /// The start response body itself streams newline-delimited output.
    TextStream,
}

/// Endpoint paths for one job kind, relative to the base URL. Job-scoped
/// endpoints get `/{job_id}` appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEndpoints {
    pub start: String,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cancel: Option<String>,
    pub mode: LaunchMode,
}

impl JobEndpoints {
    pub fn push(prefix: &str, start: &str, stream: &str, status: &str, cancel: &str) -> Self {
        Self {
            start: format!("{prefix}{start}"),
            stream: Some(format!("{prefix}{stream}")),
            status: Some(format!("{prefix}{status}")),
            cancel: Some(format!("{prefix}{cancel}")),
            mode: LaunchMode::PushWithPollFallback,
        }
    }

    pub fn defaults_for(kind: JobKind) -> Self {
        match kind {
            JobKind::Cards => Self::push("/api/cards/build", "", "/stream", "/status", "/cancel"),
            JobKind::Indexer => Self {
                start: "/api/index/run".to_string(),
                stream: None,
                status: None,
                cancel: Some("/api/index/cancel".to_string()),
                mode: LaunchMode::TextStream,
            },
            JobKind::Eval => Self::push("/api/eval", "/run", "/stream", "/status", "/cancel"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Applies to start, status and cancel requests, never to live streams.
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub endpoints: BTreeMap<JobKind, JobEndpoints>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            endpoints: JobKind::ALL
                .into_iter()
                .map(|kind| (kind, JobEndpoints::defaults_for(kind)))
                .collect(),
        }
    }
}

impl ClientSettings {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}
