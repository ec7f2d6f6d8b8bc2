use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::progress::{JobOutcome, ProgressModel, Transition};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

/// Produces the human-readable timestamp stored on each line.
pub type Stamp = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Stage,
    Tip,
    Model,
    Heartbeat,
    Regression,
    /// Transport changes, e.g. push degrading to poll.
    Channel,
    Outcome,
    /// Raw output from a streaming-text job.
    Output,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalLine {
    pub at: Instant,
    pub stamp: String,
    pub kind: LineKind,
    pub text: String,
}

/// Append-only trace of model transitions for one job.
///
/// The sink is a mirror of the model, not a source of truth. While a stage is
/// quiet it adds at most one heartbeat per `heartbeat_interval`.
pub struct LogSink {
    lines: Vec<TerminalLine>,
    heartbeat_interval: Duration,
    last_logged: Option<Instant>,
    stamp: Stamp,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("lines", &self.lines.len())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("last_logged", &self.last_logged)
            .finish()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl LogSink {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            lines: Vec::new(),
            heartbeat_interval,
            last_logged: None,
            stamp: Arc::new(|| chrono::Local::now().format("%H:%M:%S").to_string()),
        }
    }

    pub fn with_stamp(mut self, stamp: Stamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn record(&mut self, now: Instant, kind: LineKind, text: impl Into<String>) {
        self.lines.push(TerminalLine {
            at: now,
            stamp: (self.stamp)(),
            kind,
            text: text.into(),
        });
        self.last_logged = Some(now);
    }

    /// Records one line per log-worthy transition; falls back to a heartbeat
    /// when nothing was worth logging. Returns the number of lines added.
    pub fn observe(&mut self, now: Instant, model: &ProgressModel, transitions: &[Transition]) -> usize {
        let before = self.lines.len();
        for transition in transitions {
            let (kind, text) = describe(transition, model);
            self.record(now, kind, text);
        }
        if self.lines.len() == before && !model.is_finished() {
            self.heartbeat(now, model);
        }
        self.lines.len() - before
    }

    /// Adds a liveness line if the sink has been quiet for a full interval.
    pub fn heartbeat(&mut self, now: Instant, model: &ProgressModel) -> bool {
        let due = match self.last_logged {
            Some(last) => now.saturating_duration_since(last) >= self.heartbeat_interval,
            None => true,
        };
        if !due {
            return false;
        }
        let stage = model.stage().unwrap_or("working");
        let mut text = format!("{stage} {:.0}%", model.pct());
        if let (Some(done), Some(total)) = (model.done(), model.total()) {
            text.push_str(&format!(" ({done}/{total})"));
        }
        if let Some(throughput) = model.throughput() {
            text.push_str(&format!(" {throughput}"));
        }
        self.record(now, LineKind::Heartbeat, text);
        true
    }

    pub fn lines(&self) -> &[TerminalLine] {
        &self.lines
    }

    pub fn count(&self, kind: LineKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }

    pub fn last_logged(&self) -> Option<Instant> {
        self.last_logged
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.last_logged = None;
    }
}

fn describe(transition: &Transition, model: &ProgressModel) -> (LineKind, String) {
    match transition {
        Transition::StageChanged { from: Some(from), to, .. } => {
            (LineKind::Stage, format!("stage {from} -> {to}"))
        }
        Transition::StageChanged { from: None, to, .. } => (LineKind::Stage, format!("stage {to}")),
        Transition::Tip(tip) => (LineKind::Tip, tip.clone()),
        Transition::Model(info) => (LineKind::Model, format!("models: {info}")),
        Transition::PctRegressed { current, incoming } => (
            LineKind::Regression,
            format!("ignored progress {incoming:.1}% (showing {current:.1}%)"),
        ),
        Transition::Finished(JobOutcome::Done) => {
            (LineKind::Outcome, format!("done ({:.0}%)", model.pct()))
        }
        Transition::Finished(JobOutcome::Failed { message }) => {
            (LineKind::Outcome, format!("error: {message}"))
        }
        Transition::Finished(JobOutcome::Cancelled) => (LineKind::Outcome, "cancelled".to_string()),
    }
}
