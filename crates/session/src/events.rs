//! Events the session publishes to observers.

use std::collections::HashMap;

use uplink_protocol::StreamStatus;

use crate::state::SessionState;

/// Why a segment left the pipeline without being acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The connection was not open or no asset id had been assigned.
    NotReady,
    /// Checksum or encoding failed locally.
    LocalFailure(String),
    /// The connection was lost while the segment was queued or in flight.
    TransportLost,
}

/// Events emitted by the engine and the recorder.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new lifecycle state.
    StateChanged(SessionState),
    /// A segment was numbered and queued.
    SegmentQueued {
        stream_id: String,
        part_number: u64,
        size: u64,
    },
    /// The server acknowledged a segment.
    SegmentUploaded {
        stream_id: String,
        part_number: u64,
        etag: String,
    },
    /// The server rejected a segment.
    SegmentRejected {
        stream_id: String,
        part_number: u64,
        error: String,
        /// `true` if the segment was put back at the head of the queue.
        retrying: bool,
    },
    /// A segment was discarded without reaching the server.
    SegmentDropped {
        stream_id: String,
        part_number: u64,
        reason: DropReason,
    },
    /// A capture source ended unexpectedly; all streams are stopping.
    CaptureFailed { stream_id: String, reason: String },
    /// The connection failed; the session is aborted.
    TransportFailed(String),
    /// Answer to a `session_status` request.
    StatusReport(HashMap<String, StreamStatus>),
    /// The server reported an error message.
    ServerError(String),
    /// The server confirmed the whole upload.
    Completed {
        asset_id: Option<i64>,
        message: String,
    },
}
