//! Segment source adapters.
//!
//! Each logical stream runs its own [`SourceAdapter`] task. The adapter
//! repeats a bounded capture cycle against a [`CaptureSource`] and emits
//! one [`CapturedSegment`] per cycle until it is stopped or the source
//! ends.

mod adapter;
mod admission;
mod process;
mod source;

pub use adapter::{
    AdapterConfig, AdapterEvent, AdapterHandle, AdapterState, CapturedSegment, SourceAdapter,
};
pub use admission::{AllowAny, CaptureAdmission, CaptureSurface, RequireFullDisplay};
pub use process::CommandSource;
pub use source::{CaptureFuture, CaptureSource};

/// Errors produced by capture sources.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture source ended: {0}")]
    SourceEnded(String),

    #[error("capture cycle not started")]
    NotStarted,

    #[error("capture surface rejected: {0}")]
    Rejected(String),
}
