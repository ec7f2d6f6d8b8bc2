//! Jobwatch core: pure progress reducer, log sink and view-model helpers.
mod event;
mod kind;
mod log_sink;
mod progress;
mod view_model;

pub use event::{ModelInfo, ProgressEvent};
pub use kind::{JobKind, ParseJobKindError};
pub use log_sink::{LineKind, LogSink, Stamp, TerminalLine, DEFAULT_HEARTBEAT_INTERVAL};
pub use progress::{apply, finish, stage_index, JobOutcome, ProgressModel, Transition, STAGE_ORDER};
pub use view_model::{format_eta, BarStyle, ProgressView};
