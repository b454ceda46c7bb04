use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// One finite slice of a captured stream, numbered and ready to upload.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Logical source that produced the segment (e.g. `screen`, `mic_audio`).
    pub stream_id: String,
    /// Position within the stream, starting at 1.
    pub part_number: u64,
    /// Raw segment bytes.
    pub payload: Bytes,
    /// Nominal length of the capture cycle.
    pub duration: Duration,
    /// Wall-clock start of the capture cycle.
    pub captured_at: DateTime<Utc>,
}

impl Segment {
    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// `stream#part` label for logs.
    pub fn label(&self) -> String {
        format!("{}#{}", self.stream_id, self.part_number)
    }

    /// Returns `true` if this segment is the one identified by the pair.
    pub fn is(&self, stream_id: &str, part_number: u64) -> bool {
        self.stream_id == stream_id && self.part_number == part_number
    }
}

/// A segment waiting in (or popped from) the upload queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub segment: Segment,
    /// Number of times the segment was announced to the server.
    pub attempts: u32,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }
}

/// What to do with a segment the server rejected.
///
/// `max_attempts == 0` drops rejected segments. Otherwise a rejected
/// segment goes back to the head of the queue, keeping its part number,
/// until it has been retried `max_attempts` times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Drop rejected segments.
    pub const DROP: RetryPolicy = RetryPolicy { max_attempts: 0 };

    /// Returns `true` if an entry that has been announced `attempts` times
    /// may be announced again.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_attempts && attempts > 0
    }
}
