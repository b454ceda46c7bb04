use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{RecordingStatus, StreamStatus};

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

/// Authenticates the connection with the provisioned session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub token: String,
}

/// Opens (or resumes) the server-side asset for a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeSessionRequest {
    pub interview_id: String,
    pub file_extension: String,
    pub file_mime_type: String,
}

/// Announces one segment. The payload follows as a binary frame once the
/// server answers with [`ReadyForBinary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub asset_id: i64,
    pub stream_id: String,
    pub part_number: u64,
    /// SHA-256 of the payload, lowercase hex.
    pub checksum: String,
    pub size: u64,
    /// Segment start, milliseconds since the Unix epoch.
    pub start_timestamp: i64,
    /// Nominal segment length in seconds.
    pub duration: f64,
}

/// Tells the server that no more segments will follow for the asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadCompletedRequest {
    pub asset_id: i64,
}

/// Asks the server for its per-stream bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusRequest {
    pub asset_id: i64,
}

// ---------------------------------------------------------------------------
// Server payloads
// ---------------------------------------------------------------------------

/// Server response to [`InitializeSessionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInitialized {
    pub asset_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecordingStatus>,
    /// Resume checkpoint: last part number the server accepted, per stream.
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub last_part_number: HashMap<String, u64>,
}

/// The server is ready to receive the payload of one announced segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyForBinary {
    pub stream_id: String,
    pub part_number: u64,
}

/// The segment was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub stream_id: String,
    pub part_number: u64,
    /// Storage confirmation token.
    #[serde(default, deserialize_with = "null_as_default")]
    pub etag: String,
}

/// The segment was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkNack {
    pub stream_id: String,
    pub part_number: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
}

/// Final confirmation after [`UploadCompletedRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadComplete {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub message: String,
}

/// Diagnostic per-stream counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub streams: HashMap<String, StreamStatus>,
}

/// Server-reported failure that is not tied to a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_metadata_wire_names() {
        let meta = ChunkMetadata {
            asset_id: 42,
            stream_id: "screen".into(),
            part_number: 1,
            checksum: "ab".into(),
            size: 10,
            start_timestamp: 1_700_000_000_000,
            duration: 5.0,
        };
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["asset_id"], 42);
        assert_eq!(v["stream_id"], "screen");
        assert_eq!(v["part_number"], 1);
        assert_eq!(v["start_timestamp"], 1_700_000_000_000_i64);
        assert_eq!(v["duration"], 5.0);
    }

    #[test]
    fn session_initialized_without_checkpoint() {
        let init: SessionInitialized = serde_json::from_str(r#"{"asset_id":7}"#).unwrap();
        assert_eq!(init.asset_id, 7);
        assert!(init.status.is_none());
        assert!(init.last_part_number.is_empty());
    }

    #[test]
    fn session_initialized_with_checkpoint() {
        let init: SessionInitialized = serde_json::from_str(
            r#"{"asset_id":7,"status":"resumed","last_part_number":{"screen":4,"mic_audio":2}}"#,
        )
        .unwrap();
        assert_eq!(init.status, Some(RecordingStatus::Resumed));
        assert_eq!(init.last_part_number["screen"], 4);
        assert_eq!(init.last_part_number["mic_audio"], 2);
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let init: SessionInitialized =
            serde_json::from_str(r#"{"asset_id":1,"status":"archived"}"#).unwrap();
        assert_eq!(init.status, Some(RecordingStatus::Unknown));
    }

    #[test]
    fn null_checkpoint_means_no_checkpoint() {
        let init: SessionInitialized = serde_json::from_str(
            r#"{"asset_id":5,"status":"new","last_part_number":null}"#,
        )
        .unwrap();
        assert_eq!(init.asset_id, 5);
        assert!(init.last_part_number.is_empty());
    }

    #[test]
    fn null_optional_strings_decode_empty() {
        let nack: ChunkNack =
            serde_json::from_str(r#"{"stream_id":"screen","part_number":2,"error":null}"#)
                .unwrap();
        assert!(nack.error.is_empty());
        let done: UploadComplete =
            serde_json::from_str(r#"{"asset_id":null,"message":null}"#).unwrap();
        assert_eq!(done, UploadComplete::default());
        let status: SessionStatusResponse = serde_json::from_str(r#"{"streams":null}"#).unwrap();
        assert!(status.streams.is_empty());
    }

    #[test]
    fn ack_and_nack_default_missing_fields() {
        let ack: ChunkAck =
            serde_json::from_str(r#"{"stream_id":"screen","part_number":2}"#).unwrap();
        assert!(ack.etag.is_empty());
        let nack: ChunkNack =
            serde_json::from_str(r#"{"stream_id":"screen","part_number":2}"#).unwrap();
        assert!(nack.error.is_empty());
    }

    #[test]
    fn status_response_parses_streams() {
        let status: SessionStatusResponse = serde_json::from_str(
            r#"{"streams":{"screen":{"part_count":3,"total_size":3000}}}"#,
        )
        .unwrap();
        assert_eq!(status.streams["screen"].part_count, 3);
        assert_eq!(status.streams["screen"].total_size, 3000);
    }
}
