//! Recorder runtime.
//!
//! Runs one session on a single task: a `select!` loop over transport
//! events, adapter events, commands from the [`RecorderHandle`] and the
//! drain deadline. Capture adapters run on their own tasks and only talk
//! to the loop through a channel.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use uplink_capture::{
    AdapterConfig, AdapterEvent, AdapterHandle, CaptureAdmission, CaptureSource, CaptureSurface,
    SourceAdapter,
};
use uplink_connection::{Transport, TransportEvent, WsTransport, endpoint_url};
use uplink_protocol::Credentials;
use uplink_protocol::constants::{DEFAULT_COMPLETION_TIMEOUT, DEFAULT_DRAIN_GRACE};
use uplink_transfer::StreamStats;

use crate::SessionError;
use crate::engine::{Engine, EngineSettings};
use crate::events::SessionEvent;
use crate::inbound::Inbound;
use crate::state::SessionState;

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 8;
const ADAPTER_EVENT_BUFFER: usize = 64;

/// A capture source bound to its stream id.
pub struct StreamSource {
    pub stream_id: String,
    pub source: Box<dyn CaptureSource>,
}

impl StreamSource {
    pub fn new(stream_id: impl Into<String>, source: impl CaptureSource + 'static) -> Self {
        Self {
            stream_id: stream_id.into(),
            source: Box::new(source),
        }
    }

    /// Binds `source` to `stream_id` if `admission` accepts its surface.
    pub fn admitted(
        stream_id: impl Into<String>,
        source: impl CaptureSource + 'static,
        surface: &CaptureSurface,
        admission: &dyn CaptureAdmission,
    ) -> Result<Self, SessionError> {
        admission.check(surface)?;
        Ok(Self::new(stream_id, source))
    }
}

/// Timing and protocol options for a recording.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub engine: EngineSettings,
    pub adapter: AdapterConfig,
    /// How long queued segments may keep flowing after a stop.
    pub drain_grace: Duration,
    /// How long to wait for `upload_complete` once `upload_completed` is sent.
    pub completion_timeout: Duration,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            adapter: AdapterConfig::default(),
            drain_grace: DEFAULT_DRAIN_GRACE,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub state: SessionState,
    pub asset_id: Option<i64>,
    pub abort_reason: Option<String>,
    pub streams: BTreeMap<String, StreamStats>,
}

impl SessionSummary {
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    /// Turns a session that did not complete into [`SessionError::Aborted`].
    pub fn into_result(self) -> Result<Self, SessionError> {
        if self.is_completed() {
            return Ok(self);
        }
        let reason = self
            .abort_reason
            .unwrap_or_else(|| format!("session ended in state {}", self.state));
        Err(SessionError::Aborted(reason))
    }
}

#[derive(Debug)]
enum Command {
    Stop,
    Abort,
    RequestStatus,
}

/// One recording session over an open transport.
pub struct Recorder<T> {
    engine: Engine<T>,
    transport_events: mpsc::Receiver<TransportEvent>,
    sources: Vec<StreamSource>,
    settings: RecorderSettings,
    events: broadcast::Sender<SessionEvent>,
}

impl Recorder<WsTransport> {
    /// Opens a WebSocket to `endpoint` for `credentials` and prepares a
    /// session on it.
    pub async fn connect(
        endpoint: &str,
        credentials: Credentials,
        sources: Vec<StreamSource>,
        settings: RecorderSettings,
    ) -> Result<Self, SessionError> {
        let url = endpoint_url(endpoint, &credentials.connection_id);
        let (transport, transport_events) = WsTransport::connect(&url).await?;
        info!(endpoint, "connected to ingestion server");
        Ok(Self::new(
            transport,
            transport_events,
            credentials,
            sources,
            settings,
        ))
    }
}

impl<T: Transport + 'static> Recorder<T> {
    /// Prepares a session. Nothing is sent until [`spawn`](Self::spawn).
    pub fn new(
        transport: T,
        transport_events: mpsc::Receiver<TransportEvent>,
        credentials: Credentials,
        sources: Vec<StreamSource>,
        settings: RecorderSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let engine = Engine::new(
            transport,
            credentials,
            settings.engine.clone(),
            events.clone(),
        );
        Self {
            engine,
            transport_events,
            sources,
            settings,
            events,
        }
    }

    /// Subscribes to session events. Subscribe before spawning to see
    /// every event.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Starts the handshake and the event loop on a new task.
    pub fn spawn(self) -> RecorderHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let events = self.events.clone();
        let task = tokio::spawn(self.run(command_rx));
        RecorderHandle {
            commands,
            events,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionSummary {
        let (adapter_tx, mut adapter_rx) = mpsc::channel(ADAPTER_EVENT_BUFFER);
        let mut sources = Some(std::mem::take(&mut self.sources));
        let mut adapters: Vec<AdapterHandle> = Vec::new();
        let mut commands_open = true;
        let mut draining = false;
        let mut awaiting_completion = false;

        let grace = tokio::time::sleep(self.settings.drain_grace);
        tokio::pin!(grace);

        self.engine.on_open().await;

        while !self.engine.is_finished() {
            let mut stop_requested = false;

            tokio::select! {
                event = self.transport_events.recv() => match event {
                    Some(TransportEvent::Message(msg)) => match Inbound::from_message(&msg) {
                        Ok(inbound) => self.engine.handle(inbound).await,
                        Err(err) => warn!(event = ?msg.event, error = %err, "undecodable message, ignoring"),
                    },
                    Some(TransportEvent::Closed { code, reason }) => {
                        self.engine.on_transport_closed(code, &reason);
                    }
                    Some(TransportEvent::Failed(reason)) => self.engine.on_transport_failed(&reason),
                    None => self.engine.on_transport_failed("transport event stream ended"),
                },

                Some(event) = adapter_rx.recv() => match event {
                    AdapterEvent::Segment(segment) => self.engine.segment_produced(segment).await,
                    AdapterEvent::Stopped { stream_id } => {
                        debug!(stream = %stream_id, "capture finished");
                    }
                    AdapterEvent::Terminated { stream_id, reason } => {
                        self.engine.capture_failed(stream_id, reason);
                        stop_requested = true;
                    }
                },

                command = commands.recv(), if commands_open => match command {
                    Some(Command::RequestStatus) => self.engine.request_status().await,
                    Some(Command::Stop) => stop_requested = true,
                    Some(Command::Abort) => self.engine.force_abort("aborted by request").await,
                    None => {
                        debug!("recorder handle dropped, stopping");
                        commands_open = false;
                        stop_requested = true;
                    }
                },

                () = &mut grace, if draining || awaiting_completion => {
                    if draining {
                        draining = false;
                        self.engine.finish_drain().await;
                        if self.engine.awaiting_completion() {
                            awaiting_completion = true;
                            grace
                                .as_mut()
                                .reset(tokio::time::Instant::now() + self.settings.completion_timeout);
                        }
                    } else {
                        awaiting_completion = false;
                        self.engine.completion_timed_out().await;
                    }
                }
            }

            if stop_requested && self.request_stop(&adapters).await {
                grace
                    .as_mut()
                    .reset(tokio::time::Instant::now() + self.settings.drain_grace);
                draining = true;
            }

            if self.engine.state() == SessionState::Active {
                if let Some(sources) = sources.take() {
                    adapters = self.start_capture(sources, &adapter_tx);
                }
            }
        }

        for adapter in &adapters {
            adapter.stop();
        }
        drop(adapter_rx);
        for adapter in adapters {
            let stream = adapter.stream_id().to_string();
            if tokio::time::timeout(self.settings.drain_grace, adapter.join())
                .await
                .is_err()
            {
                warn!(stream = %stream, "capture did not stop in time");
            }
        }

        let summary = SessionSummary {
            state: self.engine.state(),
            asset_id: self.engine.asset_id(),
            abort_reason: self.engine.abort_reason().map(str::to_string),
            streams: self.engine.stats(),
        };
        info!(state = %summary.state, asset_id = ?summary.asset_id, "session finished");
        summary
    }

    fn start_capture(
        &self,
        sources: Vec<StreamSource>,
        events: &mpsc::Sender<AdapterEvent>,
    ) -> Vec<AdapterHandle> {
        sources
            .into_iter()
            .map(|s| {
                SourceAdapter::new(
                    s.stream_id,
                    s.source,
                    self.settings.adapter.clone(),
                    events.clone(),
                )
                .spawn()
            })
            .collect()
    }

    /// Stops every adapter and asks the engine to drain. Returns `true`
    /// if the grace period should start now.
    async fn request_stop(&mut self, adapters: &[AdapterHandle]) -> bool {
        for adapter in adapters {
            adapter.stop();
        }
        let draining = self.engine.begin_drain().await;
        if draining {
            info!(grace = ?self.settings.drain_grace, "stop requested, draining");
        }
        draining
    }
}

/// Control handle for a running recorder.
pub struct RecorderHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<SessionSummary>,
}

impl RecorderHandle {
    /// Stops capture. Queued segments keep uploading for the grace period,
    /// then the upload is completed.
    pub async fn stop(&self) {
        if self.commands.send(Command::Stop).await.is_err() {
            debug!("recorder already finished");
        }
    }

    /// Ends the session at once: nothing more is uploaded and the
    /// connection is closed. The session finishes as aborted.
    pub async fn abort(&self) {
        if self.commands.send(Command::Abort).await.is_err() {
            debug!("recorder already finished");
        }
    }

    /// Asks the server for its per-stream counters. The answer arrives as
    /// [`SessionEvent::StatusReport`].
    pub async fn request_status(&self) {
        if self.commands.send(Command::RequestStatus).await.is_err() {
            debug!("recorder already finished");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the session to end without stopping it.
    pub async fn wait(self) -> Result<SessionSummary, SessionError> {
        let Self { commands, task, .. } = self;
        let summary = task.await.map_err(|e| SessionError::Task(e.to_string()));
        drop(commands);
        summary
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;
    use uplink_protocol::EventType;

    use super::*;
    use crate::testing::{FixedSource, Frame, MockTransport};

    fn creds() -> Credentials {
        Credentials {
            session_id: "interview-1".into(),
            connection_id: "conn-1".into(),
            connection_token: "token-1".into(),
        }
    }

    fn parts(mock: &MockTransport, stream: &str) -> Vec<u64> {
        mock.sent(EventType::UploadChunkMetadata)
            .into_iter()
            .filter(|m| m["stream_id"] == stream)
            .map(|m| m["part_number"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn records_until_stopped_then_completes() {
        let (server_tx, server_rx) = mpsc::channel(64);
        let mock = MockTransport::with_server(server_tx);
        let sources = vec![
            StreamSource::new("screen", FixedSource::new(b"video")),
            StreamSource::new("mic_audio", FixedSource::new(b"audio")),
        ];
        let recorder = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            sources,
            RecorderSettings::default(),
        );
        let mut events = recorder.subscribe();
        let handle = recorder.spawn();

        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.stop().await;
        let stopped_at = Instant::now();
        let summary = handle.wait().await.unwrap();

        assert!(summary.is_completed());
        assert_eq!(summary.asset_id, Some(7));
        assert!(stopped_at.elapsed() >= DEFAULT_DRAIN_GRACE);

        // Two full cycles plus the one cut short by the stop.
        assert_eq!(parts(&mock, "screen"), vec![1, 2, 3]);
        assert_eq!(parts(&mock, "mic_audio"), vec![1, 2, 3]);
        assert_eq!(summary.streams["screen"].acked, 3);
        assert_eq!(summary.streams["mic_audio"].acked, 3);

        let frames = mock.frames();
        let n = frames.len();
        assert_eq!(frames[n - 2].event(), Some(&EventType::UploadCompleted));
        assert_eq!(frames[n - 1], Frame::Close);

        let mut saw_draining = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::StateChanged(SessionState::Draining)) {
                saw_draining = true;
            }
        }
        assert!(saw_draining);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_stops_all_streams_and_drains() {
        let (server_tx, server_rx) = mpsc::channel(64);
        let mock = MockTransport::with_server(server_tx);
        let sources = vec![
            StreamSource::new(
                "screen",
                FixedSource::failing_after(b"video", Duration::from_secs(3)),
            ),
            StreamSource::new("mic_audio", FixedSource::new(b"audio")),
        ];
        let recorder = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            sources,
            RecorderSettings::default(),
        );
        let mut events = recorder.subscribe();
        let summary = recorder.spawn().wait().await.unwrap();

        assert!(summary.is_completed());
        assert_eq!(parts(&mock, "screen"), vec![1]);
        assert_eq!(parts(&mock, "mic_audio"), vec![1]);

        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::CaptureFailed { stream_id, .. } = event {
                failed = Some(stream_id);
            }
        }
        assert_eq!(failed.as_deref(), Some("screen"));
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_aborts_session() {
        let (server_tx, server_rx) = mpsc::channel(64);
        let mock = MockTransport::with_server(server_tx.clone());
        let sources = vec![StreamSource::new("screen", FixedSource::new(b"video"))];
        let handle = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            sources,
            RecorderSettings::default(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(6)).await;
        server_tx
            .send(TransportEvent::Closed {
                code: Some(1011),
                reason: "internal error".into(),
            })
            .await
            .unwrap();
        let summary = handle.wait().await.unwrap();

        assert_eq!(summary.state, SessionState::Aborted);
        assert!(summary.abort_reason.unwrap().contains("1011"));
        assert_eq!(summary.streams["screen"].acked, 1);
        assert!(mock.sent(EventType::UploadCompleted).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_initialization_aborts() {
        let (_server_tx, server_rx) = mpsc::channel(8);
        let mock = MockTransport::new();
        let handle = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            vec![StreamSource::new("screen", FixedSource::new(b"video"))],
            RecorderSettings::default(),
        )
        .spawn();

        handle.stop().await;
        let summary = handle.wait().await.unwrap();

        assert_eq!(summary.state, SessionState::Aborted);
        assert!(summary.streams.is_empty());
        let frames = mock.frames();
        assert_eq!(frames[0].event(), Some(&EventType::Authenticate));
        assert_eq!(frames.last(), Some(&Frame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_cannot_hold_completion_forever() {
        let (server_tx, server_rx) = mpsc::channel(64);
        let mock = MockTransport::with_server(server_tx);
        mock.leave_unanswered(EventType::UploadCompleted);
        let handle = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            vec![StreamSource::new("screen", FixedSource::new(b"video"))],
            RecorderSettings::default(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.stop().await;
        let stopped_at = Instant::now();
        let summary = tokio::time::timeout(Duration::from_secs(3600), handle.wait())
            .await
            .expect("recorder must give up waiting for the server")
            .unwrap();

        assert_eq!(summary.state, SessionState::Aborted);
        assert!(summary.abort_reason.as_deref().unwrap().contains("confirm"));
        assert!(stopped_at.elapsed() >= DEFAULT_DRAIN_GRACE + DEFAULT_COMPLETION_TIMEOUT);
        assert_eq!(mock.sent(EventType::UploadCompleted).len(), 1);
        assert_eq!(mock.frames().last(), Some(&Frame::Close));
        assert!(summary.into_result().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_ends_session_without_completion() {
        let (server_tx, server_rx) = mpsc::channel(64);
        let mock = MockTransport::with_server(server_tx);
        let handle = Recorder::new(
            mock.clone(),
            server_rx,
            creds(),
            vec![StreamSource::new("screen", FixedSource::new(b"video"))],
            RecorderSettings::default(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(6)).await;
        handle.abort().await;
        let summary = handle.wait().await.unwrap();

        assert_eq!(summary.state, SessionState::Aborted);
        assert_eq!(summary.abort_reason.as_deref(), Some("aborted by request"));
        assert!(mock.sent(EventType::UploadCompleted).is_empty());
        assert_eq!(mock.frames().last(), Some(&Frame::Close));
    }

    #[test]
    fn summary_into_result() {
        let completed = SessionSummary {
            state: SessionState::Completed,
            asset_id: Some(7),
            abort_reason: None,
            streams: BTreeMap::new(),
        };
        assert!(completed.into_result().is_ok());

        let aborted = SessionSummary {
            state: SessionState::Aborted,
            asset_id: Some(7),
            abort_reason: Some("connection closed".into()),
            streams: BTreeMap::new(),
        };
        match aborted.into_result() {
            Err(SessionError::Aborted(reason)) => assert_eq!(reason, "connection closed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn admission_gates_stream_sources() {
        use uplink_capture::{CaptureError, RequireFullDisplay};

        let window = CaptureSurface::Window {
            title: "Editor".into(),
        };
        let rejected =
            StreamSource::admitted("screen", FixedSource::new(b"v"), &window, &RequireFullDisplay);
        assert!(matches!(
            rejected,
            Err(SessionError::Capture(CaptureError::Rejected(_)))
        ));

        let monitor = CaptureSurface::Monitor { display_id: None };
        let source =
            StreamSource::admitted("screen", FixedSource::new(b"v"), &monitor, &RequireFullDisplay)
                .unwrap();
        assert_eq!(source.stream_id, "screen");
    }

    #[tokio::test]
    async fn connect_failure_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Recorder::connect(
            &format!("ws://{addr}/ingest"),
            creds(),
            vec![],
            RecorderSettings::default(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
