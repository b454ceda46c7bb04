//! Session layer of the uplink pipeline.
//!
//! The [`Engine`] owns the session lifecycle, the per-stream part counters
//! and the upload queue, and reacts to one [`Inbound`] message at a time.
//! The [`Recorder`] runs the engine on a single task together with the
//! capture adapters, the transport and the drain deadline.

pub mod credentials;
pub mod engine;
pub mod events;
pub mod inbound;
pub mod recorder;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::{CredentialProvider, ProvisionFuture, StaticCredentials};
pub use engine::{Engine, EngineSettings};
pub use events::{DropReason, SessionEvent};
pub use inbound::Inbound;
pub use recorder::{Recorder, RecorderHandle, RecorderSettings, SessionSummary, StreamSource};
pub use state::SessionState;

use uplink_capture::CaptureError;
use uplink_connection::TransportError;

/// Errors produced by the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("credential provisioning failed: {0}")]
    Provision(String),

    #[error("session aborted: {0}")]
    Aborted(String),

    #[error("recorder task failed: {0}")]
    Task(String),
}
