use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// the connection is considered dead. Set high enough to tolerate a slow
/// server while it stores a large segment.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Outbound frame buffer between the engine and the write pump.
pub const WS_SEND_BUFFER: usize = 256;

/// Default length of one capture cycle (one segment).
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_secs(5);

/// Default pause between two capture cycles of the same stream.
pub const DEFAULT_RESTART_GAP: Duration = Duration::from_millis(100);

/// Default time the session keeps draining after a stop request before it
/// declares the upload completed.
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Default time to wait for `upload_complete` after `upload_completed` was
/// sent before the session is aborted.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

/// Normal-closure WebSocket close code.
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// Event tag of a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Client to server
    #[serde(rename = "authenticate")]
    Authenticate,
    #[serde(rename = "initialize_session_recording")]
    InitializeSessionRecording,
    #[serde(rename = "upload_chunk_metadata")]
    UploadChunkMetadata,
    #[serde(rename = "upload_completed")]
    UploadCompleted,
    #[serde(rename = "session_status")]
    SessionStatus,

    // Server to client
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "session_recording_initialized")]
    SessionRecordingInitialized,
    #[serde(rename = "ready_for_binary")]
    ReadyForBinary,
    #[serde(rename = "chunk_ack")]
    ChunkAck,
    #[serde(rename = "chunk_nack")]
    ChunkNack,
    #[serde(rename = "upload_complete")]
    UploadComplete,
    #[serde(rename = "session_status_response")]
    SessionStatusResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown event tags deserialize here.
    #[serde(other)]
    Unknown,
}
