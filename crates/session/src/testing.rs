//! Test doubles shared by the engine and recorder tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use uplink_capture::{CaptureError, CaptureFuture, CaptureSource};
use uplink_connection::{Transport, TransportError, TransportEvent, TransportFuture};
use uplink_protocol::EventType;
use uplink_protocol::envelope::Message;

use crate::inbound::Inbound;

/// A frame written to the [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Text { event: EventType, data: Value },
    Binary(Bytes),
    Close,
}

impl Frame {
    pub(crate) fn event(&self) -> Option<&EventType> {
        match self {
            Frame::Text { event, .. } => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    frames: Vec<Frame>,
    closed: bool,
    failing: bool,
    /// When set, a scripted server answers every frame on this channel.
    server: Option<mpsc::Sender<TransportEvent>>,
    announced: Option<(String, u64)>,
    /// Events the scripted server never answers.
    unanswered: Vec<EventType>,
}

/// Transport that records every outbound frame.
///
/// Clones share state, so a test keeps one clone while the engine owns
/// the other.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A transport whose peer accepts everything: it authenticates,
    /// assigns asset 7, asks for every announced payload, acknowledges it
    /// and confirms completion.
    pub(crate) fn with_server(server: mpsc::Sender<TransportEvent>) -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().server = Some(server);
        mock
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Removes and returns every frame recorded so far.
    pub(crate) fn take(&self) -> Vec<Frame> {
        std::mem::take(&mut self.state.lock().unwrap().frames)
    }

    /// Payloads of the text frames tagged `event`, in send order.
    pub(crate) fn sent(&self, event: EventType) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text { event: e, data } if e == event => Some(data),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn binaries(&self) -> Vec<Bytes> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Binary(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    /// Stops the scripted server from answering `event`.
    pub(crate) fn leave_unanswered(&self, event: EventType) {
        self.state.lock().unwrap().unanswered.push(event);
    }

    /// Makes every following send fail as if the socket had died without
    /// the close being noticed yet.
    pub(crate) fn fail_sends(&self) {
        self.state.lock().unwrap().failing = true;
    }

    fn record(&self, frame: Frame) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.failing {
            return Err(TransportError::Closed);
        }
        if let Some(reply) = server_reply(&mut state, &frame) {
            if let Some(server) = &state.server {
                let _ = server.try_send(TransportEvent::Message(reply));
            }
        }
        state.frames.push(frame);
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send_text(&mut self, message: &Message) -> TransportFuture<'_> {
        let data = match &message.data {
            Some(raw) => serde_json::from_str(raw.get()).unwrap(),
            None => Value::Null,
        };
        let result = self.record(Frame::Text {
            event: message.event.clone(),
            data,
        });
        Box::pin(async move { result })
    }

    fn send_binary(&mut self, data: Bytes) -> TransportFuture<'_> {
        let result = self.record(Frame::Binary(data));
        Box::pin(async move { result })
    }

    fn close(&mut self) -> TransportFuture<'_> {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            state.frames.push(Frame::Close);
        }
        Box::pin(async { Ok(()) })
    }

    fn is_open(&self) -> bool {
        !self.state.lock().unwrap().closed
    }
}

/// Builds a server message with a JSON payload.
pub(crate) fn server_message(event: EventType, data: Value) -> Message {
    if data.is_null() {
        Message::bare(event)
    } else {
        Message::new(event, Some(&data)).unwrap()
    }
}

/// Builds and decodes a server message.
pub(crate) fn inbound(event: EventType, data: Value) -> Inbound {
    Inbound::from_message(&server_message(event, data)).unwrap()
}

fn server_reply(state: &mut MockState, frame: &Frame) -> Option<Message> {
    state.server.as_ref()?;
    let (event, data) = match frame {
        Frame::Text { event, data } => (event, data),
        Frame::Binary(_) => {
            let (stream, part) = state.announced.take()?;
            return Some(server_message(
                EventType::ChunkAck,
                json!({"stream_id": stream, "part_number": part, "etag": format!("{stream}-{part}")}),
            ));
        }
        Frame::Close => return None,
    };
    if state.unanswered.contains(event) {
        return None;
    }
    match event {
        EventType::Authenticate => Some(Message::bare(EventType::Authenticated)),
        EventType::InitializeSessionRecording => Some(server_message(
            EventType::SessionRecordingInitialized,
            json!({"asset_id": 7, "status": "new"}),
        )),
        EventType::UploadChunkMetadata => {
            let stream = data["stream_id"].as_str()?.to_string();
            let part = data["part_number"].as_u64()?;
            state.announced = Some((stream.clone(), part));
            Some(server_message(
                EventType::ReadyForBinary,
                json!({"stream_id": stream, "part_number": part}),
            ))
        }
        EventType::UploadCompleted => Some(server_message(
            EventType::UploadComplete,
            json!({"asset_id": 7, "message": "stored"}),
        )),
        _ => None,
    }
}

/// Capture source that yields the same bytes every cycle and can be told
/// to die after a while.
pub(crate) struct FixedSource {
    payload: &'static [u8],
    fail_after: Option<Duration>,
}

impl FixedSource {
    pub(crate) fn new(payload: &'static [u8]) -> Self {
        Self {
            payload,
            fail_after: None,
        }
    }

    pub(crate) fn failing_after(payload: &'static [u8], after: Duration) -> Self {
        Self {
            payload,
            fail_after: Some(after),
        }
    }
}

impl CaptureSource for FixedSource {
    fn begin(&mut self) -> CaptureFuture<'_, Result<(), CaptureError>> {
        Box::pin(async { Ok(()) })
    }

    fn finish(&mut self) -> CaptureFuture<'_, Result<Vec<u8>, CaptureError>> {
        let bytes = self.payload.to_vec();
        Box::pin(async move { Ok(bytes) })
    }

    fn ended(&mut self) -> CaptureFuture<'_, CaptureError> {
        match self.fail_after {
            Some(after) => Box::pin(async move {
                tokio::time::sleep(after).await;
                CaptureError::SourceEnded("device unplugged".into())
            }),
            None => Box::pin(std::future::pending()),
        }
    }
}
