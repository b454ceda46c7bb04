//! Session protocol engine.
//!
//! Drives the handshake, the per-segment metadata/binary/ack exchange and
//! the completion handshake over one [`Transport`]. All state lives here
//! and is touched from a single task, so no locking is needed: the engine
//! reacts to one input at a time (an inbound message, a produced segment,
//! a transport event or a drain step) and returns once the resulting
//! frames are queued.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use uplink_capture::CapturedSegment;
use uplink_connection::{Transport, TransportError};
use uplink_protocol::envelope::Message;
use uplink_protocol::messages::{
    AuthenticateRequest, ChunkAck, ChunkMetadata, ChunkNack, InitializeSessionRequest,
    ReadyForBinary, SessionInitialized, SessionStatusRequest, UploadComplete,
    UploadCompletedRequest,
};
use uplink_protocol::{Credentials, EventType, OutputFormat};
use uplink_transfer::{
    PartCounters, ReleaseReason, RetryPolicy, Segment, StreamStats, ThroughputMeter, UploadQueue,
    UploadStats, checksum_payload,
};

use crate::events::{DropReason, SessionEvent};
use crate::inbound::Inbound;
use crate::state::SessionState;

/// Per-session options.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub format: OutputFormat,
    pub retry: RetryPolicy,
}

/// Protocol state machine for one recording session.
pub struct Engine<T> {
    transport: T,
    credentials: Credentials,
    settings: EngineSettings,
    state: SessionState,
    asset_id: Option<i64>,
    /// `upload_completed` has been sent; nothing new is announced after it.
    completion_requested: bool,
    abort_reason: Option<String>,
    counters: PartCounters,
    queue: UploadQueue,
    stats: UploadStats,
    throughput: ThroughputMeter,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport> Engine<T> {
    pub fn new(
        transport: T,
        credentials: Credentials,
        settings: EngineSettings,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            credentials,
            settings,
            state: SessionState::Disconnected,
            asset_id: None,
            completion_requested: false,
            abort_reason: None,
            counters: PartCounters::new(),
            queue: UploadQueue::new(),
            stats: UploadStats::new(),
            throughput: ThroughputMeter::new(None, None),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn asset_id(&self) -> Option<i64> {
        self.asset_id
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Why the session was aborted, if it was.
    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Segments waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> bool {
        self.queue.in_flight()
    }

    /// Last part number assigned to `stream_id`.
    pub fn last_part(&self, stream_id: &str) -> u64 {
        self.counters.last(stream_id)
    }

    pub fn stats(&self) -> BTreeMap<String, StreamStats> {
        self.stats.snapshot()
    }

    /// Acknowledged bytes per second over the recent window.
    pub fn throughput(&self) -> f64 {
        self.throughput.bytes_per_second()
    }

    /// Starts the handshake on a freshly opened connection.
    pub async fn on_open(&mut self) {
        if self.state != SessionState::Disconnected {
            warn!(state = %self.state, "connection opened twice, ignoring");
            return;
        }
        self.set_state(SessionState::Authenticating);
        let request = AuthenticateRequest {
            token: self.credentials.connection_token.clone(),
        };
        self.send(EventType::Authenticate, &request).await;
    }

    /// Applies one inbound message.
    ///
    /// Messages that are not valid in the current state are logged and
    /// otherwise ignored.
    pub async fn handle(&mut self, inbound: Inbound) {
        match (self.state, inbound) {
            (SessionState::Authenticating, Inbound::Authenticated) => {
                self.on_authenticated().await;
            }
            (SessionState::Initializing, Inbound::SessionInitialized(init)) => {
                self.on_initialized(init).await;
            }
            (state, Inbound::ReadyForBinary(ready)) if state.is_uploading() => {
                self.on_ready(ready).await;
            }
            (state, Inbound::ChunkAck(ack)) if state.is_uploading() => {
                self.on_ack(ack).await;
            }
            (state, Inbound::ChunkNack(nack)) if state.is_uploading() => {
                self.on_nack(nack).await;
            }
            (SessionState::Draining, Inbound::UploadComplete(done)) if self.completion_requested => {
                self.on_complete(done).await;
            }
            (_, Inbound::StatusResponse(status)) => {
                debug!(streams = status.streams.len(), "session status received");
                self.publish(SessionEvent::StatusReport(status.streams));
            }
            (_, Inbound::Error(err)) => {
                warn!(message = %err.message, "server reported an error");
                self.publish(SessionEvent::ServerError(err.message));
            }
            (state, other) => {
                debug!(%state, event = ?other.event(), "ignoring message not valid in current state");
            }
        }
    }

    async fn on_authenticated(&mut self) {
        info!(session = %self.credentials.session_id, "authenticated");
        self.set_state(SessionState::Initializing);
        let request = InitializeSessionRequest {
            interview_id: self.credentials.session_id.clone(),
            file_extension: self.settings.format.file_extension.clone(),
            file_mime_type: self.settings.format.file_mime_type.clone(),
        };
        self.send(EventType::InitializeSessionRecording, &request).await;
    }

    async fn on_initialized(&mut self, init: SessionInitialized) {
        self.asset_id = Some(init.asset_id);
        self.counters.seed(&init.last_part_number);
        info!(
            asset_id = init.asset_id,
            status = ?init.status,
            checkpoint = ?init.last_part_number,
            "session recording initialized"
        );
        self.set_state(SessionState::Active);
        self.try_advance().await;
    }

    /// Numbers a freshly captured segment, queues it and advances.
    ///
    /// The part number is consumed here even if the segment never reaches
    /// the server.
    pub async fn segment_produced(&mut self, captured: CapturedSegment) {
        let part_number = self.counters.next(&captured.stream_id);
        let segment = Segment {
            stream_id: captured.stream_id,
            part_number,
            payload: captured.payload,
            duration: captured.duration,
            captured_at: captured.captured_at,
        };
        debug!(stream = %segment.stream_id, part = part_number, size = segment.size(), "segment produced");
        self.publish(SessionEvent::SegmentQueued {
            stream_id: segment.stream_id.clone(),
            part_number,
            size: segment.size(),
        });
        self.queue.enqueue(segment);
        self.try_advance().await;
    }

    /// Starts the next transfer if none is in flight.
    ///
    /// Segments that come up while the connection is not ready are dropped.
    /// Safe to call at any time; a no-op while a transfer is in flight.
    pub async fn try_advance(&mut self) {
        loop {
            let segment = match self.queue.try_advance() {
                Some(pending) => pending.segment().clone(),
                None => return,
            };

            let Some(asset_id) = self.ready_asset_id() else {
                debug!(segment = %segment.label(), state = %self.state, "connection not ready, dropping segment");
                self.drop_in_flight(DropReason::NotReady);
                continue;
            };

            let checksum = match checksum_payload(
                &segment.stream_id,
                segment.part_number,
                segment.payload.clone(),
            )
            .await
            {
                Ok(checksum) => checksum,
                Err(err) => {
                    warn!(segment = %segment.label(), error = %err, "failed to prepare segment");
                    self.drop_in_flight(DropReason::LocalFailure(err.to_string()));
                    continue;
                }
            };

            let metadata = ChunkMetadata {
                asset_id,
                stream_id: segment.stream_id.clone(),
                part_number: segment.part_number,
                checksum: checksum.clone(),
                size: segment.size(),
                start_timestamp: segment.captured_at.timestamp_millis(),
                duration: segment.duration.as_secs_f64(),
            };
            if !self.send(EventType::UploadChunkMetadata, &metadata).await {
                return;
            }
            if !self.queue.lock_mut().stage(checksum) {
                warn!(segment = %segment.label(), "segment left the in-flight slot before staging, dropping");
                self.drop_in_flight(DropReason::LocalFailure("payload could not be staged".into()));
                continue;
            }
            trace!(segment = %segment.label(), "metadata sent, payload staged");
            return;
        }
    }

    async fn on_ready(&mut self, ready: ReadyForBinary) {
        let Some(payload) = self
            .queue
            .lock_mut()
            .take_for_send(&ready.stream_id, ready.part_number)
        else {
            debug!(stream = %ready.stream_id, part = ready.part_number, "readiness for a segment that is not staged, ignoring");
            return;
        };

        debug!(stream = %ready.stream_id, part = ready.part_number, size = payload.len(), "sending payload");
        if let Err(err) = self.transport.send_binary(payload).await {
            self.transport_lost(format!("failed to send payload: {err}"));
        }
    }

    async fn on_ack(&mut self, ack: ChunkAck) {
        if !self.queue.lock().matches(&ack.stream_id, ack.part_number) {
            warn!(stream = %ack.stream_id, part = ack.part_number, "ack for a segment that is not in flight");
            return;
        }
        if let Some(done) = self.queue.lock_mut().release(ReleaseReason::Acked) {
            let segment = done.segment();
            self.stats
                .record_ack(&segment.stream_id, segment.part_number, segment.size());
            self.throughput.add_sample(segment.size());
            info!(stream = %segment.stream_id, part = segment.part_number, etag = %ack.etag, "segment uploaded");
            self.publish(SessionEvent::SegmentUploaded {
                stream_id: ack.stream_id,
                part_number: ack.part_number,
                etag: ack.etag,
            });
        }
        self.try_advance().await;
    }

    async fn on_nack(&mut self, nack: ChunkNack) {
        if !self.queue.lock().matches(&nack.stream_id, nack.part_number) {
            warn!(stream = %nack.stream_id, part = nack.part_number, "nack for a segment that is not in flight");
            return;
        }
        if let Some(rejected) = self.queue.lock_mut().release(ReleaseReason::Rejected) {
            let retrying = self.settings.retry.should_retry(rejected.attempts());
            warn!(
                stream = %nack.stream_id,
                part = nack.part_number,
                error = %nack.error,
                attempt = rejected.attempts(),
                retrying,
                "segment rejected"
            );
            if retrying {
                self.stats.record_retry(&nack.stream_id);
                self.queue.requeue_front(rejected.into_entry());
            } else {
                self.stats.record_rejection(&nack.stream_id);
            }
            self.publish(SessionEvent::SegmentRejected {
                stream_id: nack.stream_id,
                part_number: nack.part_number,
                error: nack.error,
                retrying,
            });
        }
        self.try_advance().await;
    }

    async fn on_complete(&mut self, done: UploadComplete) {
        let asset_id = done.asset_id.or(self.asset_id);
        info!(?asset_id, message = %done.message, "upload complete");
        self.drop_in_flight(DropReason::NotReady);
        self.set_state(SessionState::Completed);
        self.publish(SessionEvent::Completed {
            asset_id,
            message: done.message,
        });
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "close after completion failed");
        }
    }

    /// Handles a stop request.
    ///
    /// Returns `true` if the session entered `Draining`, which is when the
    /// caller stops capture and starts the grace period. A stop before
    /// the session is active aborts it instead.
    pub async fn begin_drain(&mut self) -> bool {
        match self.state {
            SessionState::Active => {
                info!(queued = self.queue.len(), in_flight = self.queue.in_flight(), "draining");
                self.set_state(SessionState::Draining);
                true
            }
            SessionState::Draining | SessionState::Completed | SessionState::Aborted => false,
            state => {
                info!(%state, "stopped before the session became active");
                self.abort(format!("stopped while {state}"));
                if let Err(err) = self.transport.close().await {
                    debug!(error = %err, "close after early stop failed");
                }
                false
            }
        }
    }

    /// Ends the grace period: sends `upload_completed` whatever is still
    /// queued. Segments that have not been announced yet are dropped.
    pub async fn finish_drain(&mut self) {
        if self.state != SessionState::Draining || self.completion_requested {
            return;
        }
        let Some(asset_id) = self.asset_id else {
            return;
        };
        self.completion_requested = true;

        for entry in self.queue.take_all() {
            self.record_drop(&entry.segment, DropReason::NotReady);
        }
        info!(asset_id, in_flight = self.queue.in_flight(), "grace period over, completing upload");
        self.send(EventType::UploadCompleted, &UploadCompletedRequest { asset_id })
            .await;
    }

    /// `upload_completed` was sent and `upload_complete` has not arrived yet.
    pub fn awaiting_completion(&self) -> bool {
        self.state == SessionState::Draining && self.completion_requested
    }

    /// The server never confirmed completion: abort and close.
    pub async fn completion_timed_out(&mut self) {
        if !self.awaiting_completion() {
            return;
        }
        warn!(asset_id = ?self.asset_id, "no upload confirmation from server");
        self.force_abort("server did not confirm upload completion")
            .await;
    }

    /// Aborts a running session and closes the connection.
    pub async fn force_abort(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        info!(state = %self.state, %reason, "aborting session");
        self.abort(reason.to_string());
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "close after abort failed");
        }
    }

    /// Asks the server for its per-stream counters.
    pub async fn request_status(&mut self) {
        match self.asset_id {
            Some(asset_id) if !self.state.is_terminal() => {
                self.send(EventType::SessionStatus, &SessionStatusRequest { asset_id })
                    .await;
            }
            _ => debug!(state = %self.state, "no active asset, status request skipped"),
        }
    }

    /// Records a capture failure. The caller stops every stream.
    pub fn capture_failed(&mut self, stream_id: String, reason: String) {
        warn!(stream = %stream_id, %reason, "capture source failed, stopping all streams");
        self.publish(SessionEvent::CaptureFailed { stream_id, reason });
    }

    /// The peer or the network closed the connection.
    pub fn on_transport_closed(&mut self, code: Option<u16>, reason: &str) {
        if self.state.is_terminal() {
            debug!(?code, "connection closed after session end");
            return;
        }
        self.transport_lost(format!("connection closed (code {code:?}) {reason}"));
    }

    /// The connection failed.
    pub fn on_transport_failed(&mut self, reason: &str) {
        if self.state.is_terminal() {
            debug!(%reason, "transport failure after session end");
            return;
        }
        self.transport_lost(reason.to_string());
    }

    fn transport_lost(&mut self, reason: String) {
        warn!(state = %self.state, %reason, "transport lost, aborting session");
        self.publish(SessionEvent::TransportFailed(reason.clone()));
        self.abort(reason);
    }

    /// Resets the in-flight lock, drops everything queued and enters `Aborted`.
    fn abort(&mut self, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        self.drop_in_flight(DropReason::TransportLost);
        for entry in self.queue.take_all() {
            self.record_drop(&entry.segment, DropReason::TransportLost);
        }
        self.abort_reason = Some(reason);
        self.set_state(SessionState::Aborted);
    }

    /// Asset id if a new segment may be announced right now.
    fn ready_asset_id(&self) -> Option<i64> {
        if !self.state.is_uploading() || self.completion_requested || !self.transport.is_open() {
            return None;
        }
        self.asset_id
    }

    fn drop_in_flight(&mut self, reason: DropReason) {
        let release = match reason {
            DropReason::NotReady => ReleaseReason::NotReady,
            DropReason::LocalFailure(_) => ReleaseReason::LocalFailure,
            DropReason::TransportLost => ReleaseReason::TransportLost,
        };
        if let Some(pending) = self.queue.lock_mut().release(release) {
            self.record_drop(pending.segment(), reason);
        }
    }

    fn record_drop(&mut self, segment: &Segment, reason: DropReason) {
        self.stats.record_drop(&segment.stream_id);
        self.publish(SessionEvent::SegmentDropped {
            stream_id: segment.stream_id.clone(),
            part_number: segment.part_number,
            reason,
        });
    }

    /// Sends a text frame. A failed send aborts the session and returns `false`.
    async fn send<P: Serialize>(&mut self, event: EventType, payload: &P) -> bool {
        let result = match Message::new(event.clone(), Some(payload)) {
            Ok(msg) => self.transport.send_text(&msg).await,
            Err(err) => Err(TransportError::Json(err)),
        };
        match result {
            Ok(()) => {
                trace!(?event, "sent");
                true
            }
            Err(err) => {
                self.transport_lost(format!("failed to send {event:?}: {err}"));
                false
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "session state changed");
        self.state = next;
        self.publish(SessionEvent::StateChanged(next));
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
