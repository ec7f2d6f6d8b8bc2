use jobwatch_core::{JobOutcome, ProgressEvent};
use serde_json::Value;

use crate::types::ChannelEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    Done,
    Error,
    Cancelled,
    Other(String),
}

impl RemoteStatus {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            None => RemoteStatus::Running,
            Some(status) => match status.as_str() {
                "running" | "" => RemoteStatus::Running,
                "done" => RemoteStatus::Done,
                "error" => RemoteStatus::Error,
                "cancelled" => RemoteStatus::Cancelled,
                _ => RemoteStatus::Other(status),
            },
        }
    }
}

/// Body of `GET <status>/{job_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus {
    pub status: RemoteStatus,
    pub event: ProgressEvent,
    pub message: Option<String>,
}

impl PollStatus {
    /// `None` when the body is not a JSON object.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let message = ["error", "detail", "message"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(ToOwned::to_owned);
        Some(Self {
            status: RemoteStatus::parse(object.get("status").and_then(Value::as_str)),
            event: ProgressEvent::from_json(value),
            message,
        })
    }

    /// Maps the status onto the same contract push events use. Anything that
    /// is not terminal counts as progress.
    pub fn into_channel_event(self) -> ChannelEvent {
        let outcome = match self.status {
            RemoteStatus::Done => JobOutcome::Done,
            RemoteStatus::Error => JobOutcome::Failed {
                message: self.message.unwrap_or_else(|| "job reported an error".to_string()),
            },
            RemoteStatus::Cancelled => JobOutcome::Cancelled,
            RemoteStatus::Running | RemoteStatus::Other(_) => {
                return ChannelEvent::Progress(self.event)
            }
        };
        ChannelEvent::Terminal {
            outcome,
            payload: Some(self.event),
        }
    }
}
