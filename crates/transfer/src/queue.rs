use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::TransferError;
use crate::types::{QueueEntry, Segment};

/// Where the in-flight segment is in the metadata/binary/ack exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Popped from the queue; checksum is being computed.
    Preparing,
    /// Metadata sent; payload staged until the server asks for it.
    AwaitingReady,
    /// Payload sent; waiting for `chunk_ack` or `chunk_nack`.
    AwaitingAck,
}

/// Why the in-flight lock was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Acked,
    Rejected,
    /// Checksum or encoding failed before the server was involved.
    LocalFailure,
    /// The connection was not ready when the segment came up.
    NotReady,
    /// The connection failed or closed mid-transfer.
    TransportLost,
}

/// The one segment currently owned by the in-flight lock.
#[derive(Debug)]
pub struct PendingTransfer {
    entry: QueueEntry,
    checksum: Option<String>,
    phase: TransferPhase,
}

impl PendingTransfer {
    pub fn segment(&self) -> &Segment {
        &self.entry.segment
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.entry.attempts
    }

    /// Gives the queue entry back, e.g. to requeue it for a retry.
    pub fn into_entry(self) -> QueueEntry {
        self.entry
    }
}

/// Single-flight lock with its pending-item slot.
///
/// Holding the lock and having a [`PendingTransfer`] are the same thing:
/// the slot is filled by [`UploadQueue::try_advance`] and emptied only by
/// [`FlightLock::release`].
#[derive(Debug, Default)]
pub struct FlightLock {
    slot: Option<PendingTransfer>,
}

impl FlightLock {
    pub fn is_held(&self) -> bool {
        self.slot.is_some()
    }

    pub fn pending(&self) -> Option<&PendingTransfer> {
        self.slot.as_ref()
    }

    fn acquire(&mut self, mut entry: QueueEntry) -> Result<(), TransferError> {
        if self.slot.is_some() {
            return Err(TransferError::LockHeld);
        }
        entry.attempts += 1;
        trace!(segment = %entry.segment.label(), attempt = entry.attempts, "in-flight lock acquired");
        self.slot = Some(PendingTransfer {
            entry,
            checksum: None,
            phase: TransferPhase::Preparing,
        });
        Ok(())
    }

    /// Records the checksum once metadata has been sent and stages the
    /// payload for the server's readiness signal.
    ///
    /// Returns `false` if nothing is being prepared.
    pub fn stage(&mut self, checksum: String) -> bool {
        match self.slot.as_mut() {
            Some(p) if p.phase == TransferPhase::Preparing => {
                p.checksum = Some(checksum);
                p.phase = TransferPhase::AwaitingReady;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the pending segment is `stream_id#part_number`.
    pub fn matches(&self, stream_id: &str, part_number: u64) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|p| p.entry.segment.is(stream_id, part_number))
    }

    /// Hands out the staged payload if the server asked for exactly the
    /// pending pair. Anything else leaves the lock untouched.
    pub fn take_for_send(&mut self, stream_id: &str, part_number: u64) -> Option<Bytes> {
        let p = self.slot.as_mut()?;
        if p.phase != TransferPhase::AwaitingReady || !p.entry.segment.is(stream_id, part_number) {
            return None;
        }
        p.phase = TransferPhase::AwaitingAck;
        Some(p.entry.segment.payload.clone())
    }

    /// Releases the lock. This is the only way the slot is emptied.
    pub fn release(&mut self, reason: ReleaseReason) -> Option<PendingTransfer> {
        let released = self.slot.take();
        if let Some(p) = &released {
            debug!(segment = %p.entry.segment.label(), ?reason, "in-flight lock released");
        }
        released
    }
}

/// FIFO of segments across all streams with at most one transfer in flight.
#[derive(Debug, Default)]
pub struct UploadQueue {
    entries: VecDeque<QueueEntry>,
    lock: FlightLock,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment to the tail. Never blocks.
    pub fn enqueue(&mut self, segment: Segment) {
        trace!(segment = %segment.label(), depth = self.entries.len() + 1, "segment queued");
        self.entries.push_back(QueueEntry::new(segment));
    }

    /// Puts a previously popped entry back at the head (retry).
    pub fn requeue_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
    }

    /// Pops the head into the in-flight slot if the lock is free.
    ///
    /// Returns the newly pending transfer, or `None` when a transfer is
    /// already in flight or the queue is empty. Calling it speculatively is
    /// always safe.
    pub fn try_advance(&mut self) -> Option<&PendingTransfer> {
        if self.lock.is_held() {
            return None;
        }
        let entry = self.entries.pop_front()?;
        // The lock was checked above, so acquisition cannot fail.
        self.lock.acquire(entry).ok()?;
        self.lock.pending()
    }

    pub fn lock(&self) -> &FlightLock {
        &self.lock
    }

    pub fn lock_mut(&mut self) -> &mut FlightLock {
        &mut self.lock
    }

    pub fn in_flight(&self) -> bool {
        self.lock.is_held()
    }

    /// Number of queued entries, not counting the in-flight one.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every queued entry (the in-flight slot is left alone).
    pub fn take_all(&mut self) -> Vec<QueueEntry> {
        self.entries.drain(..).collect()
    }
}
