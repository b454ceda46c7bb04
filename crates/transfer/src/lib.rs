//! Segment bookkeeping between capture and the wire.
//!
//! Holds the checksum encoder, per-stream part counters and the
//! single-flight [`UploadQueue`] that serializes every stream onto one
//! connection.

mod checksum;
mod counters;
mod queue;
mod stats;
mod types;

pub use checksum::{checksum_bytes, checksum_payload};
pub use counters::PartCounters;
pub use queue::{FlightLock, PendingTransfer, ReleaseReason, TransferPhase, UploadQueue};
pub use stats::{StreamStats, ThroughputMeter, UploadStats};
pub use types::{QueueEntry, RetryPolicy, Segment};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("segment {stream_id}#{part_number} has an empty payload")]
    EmptyPayload { stream_id: String, part_number: u64 },

    #[error("encoder task failed: {0}")]
    Encoder(String),

    #[error("a transfer is already in flight")]
    LockHeld,
}
