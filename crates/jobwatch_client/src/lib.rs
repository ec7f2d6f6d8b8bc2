//! Jobwatch client: launches backend jobs and follows them to completion
//! over a push channel with a polling fallback.
mod backend;
mod channel;
mod controller;
mod frames;
mod registry;
mod settings;
mod status;
mod types;

pub use backend::{ByteStream, HttpBackend, JobBackend, LaunchResponse, JOB_ID_HEADER};
pub use channel::{Channel, ChannelId, ChannelManager, EventSink};
pub use controller::{ControllerSnapshot, JobController};
pub use registry::JobRegistry;
pub use settings::{ClientSettings, JobEndpoints, LaunchMode};
pub use status::{PollStatus, RemoteStatus};
pub use types::{
    CancelError, ChannelEvent, ControllerState, JobHandle, JobParams, LaunchError, Transport,
    TransportError, TransportFailure,
};
