fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use uplink_protocol::messages::{
        AuthenticateRequest, ChunkAck, ChunkMetadata, ChunkNack, InitializeSessionRequest,
        ReadyForBinary, ServerError, SessionInitialized, SessionStatusRequest,
        SessionStatusResponse, UploadComplete, UploadCompletedRequest,
    };
    use uplink_protocol::types::RecordingStatus;
    use uplink_protocol::{EventType, Message};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture file as text.
    fn load_text(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&load_text(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Servers written in dynamic languages may send `5` where Rust writes
    /// `5.0`; both mean the same thing on the wire.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Decodes a fixture envelope, checks its tag, decodes the payload as
    /// `T`, re-encodes the whole envelope and compares JSON values.
    fn roundtrip_test<T>(name: &str, event: EventType) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let msg = Message::from_text(&load_text(name))
            .unwrap_or_else(|e| panic!("failed to decode envelope {name}: {e}"));
        assert_eq!(msg.event, event, "event tag of {name}");

        let parsed: T = msg
            .require_data()
            .unwrap_or_else(|e| panic!("failed to decode payload of {name}: {e}"));
        let rewrapped = Message::new(event, Some(&parsed))
            .and_then(|m| m.to_text())
            .unwrap_or_else(|e| panic!("failed to re-encode {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_str(&rewrapped).unwrap();

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
        parsed
    }

    // --- Client to server ---

    #[test]
    fn fixture_authenticate() {
        let req: AuthenticateRequest = roundtrip_test("authenticate.json", EventType::Authenticate);
        assert!(req.token.starts_with("eyJ"));
    }

    #[test]
    fn fixture_initialize_session_recording() {
        let req: InitializeSessionRequest = roundtrip_test(
            "initialize_session_recording.json",
            EventType::InitializeSessionRecording,
        );
        assert_eq!(req.interview_id, "interview-2041");
    }

    #[test]
    fn fixture_upload_chunk_metadata() {
        let meta: ChunkMetadata =
            roundtrip_test("upload_chunk_metadata.json", EventType::UploadChunkMetadata);
        assert_eq!(meta.part_number, 5);
        assert_eq!(meta.checksum, uplink_transfer::checksum_bytes(b"hello world"));
        assert_eq!(meta.size, 11);
    }

    #[test]
    fn fixture_upload_completed() {
        let req: UploadCompletedRequest =
            roundtrip_test("upload_completed.json", EventType::UploadCompleted);
        assert_eq!(req.asset_id, 5521);
    }

    #[test]
    fn fixture_session_status() {
        roundtrip_test::<SessionStatusRequest>("session_status.json", EventType::SessionStatus);
    }

    // --- Server to client ---

    #[test]
    fn fixture_authenticated_has_no_payload() {
        let msg = Message::from_text(&load_text("authenticated.json")).unwrap();
        assert_eq!(msg.event, EventType::Authenticated);
        assert!(msg.data.is_none());

        let reencoded: serde_json::Value =
            serde_json::from_str(&Message::bare(EventType::Authenticated).to_text().unwrap())
                .unwrap();
        assert_eq!(reencoded, load_fixture("authenticated.json"));
    }

    #[test]
    fn fixture_session_recording_initialized_resumed() {
        let init: SessionInitialized = roundtrip_test(
            "session_recording_initialized.json",
            EventType::SessionRecordingInitialized,
        );
        assert_eq!(init.status, Some(RecordingStatus::Resumed));
        assert_eq!(init.last_part_number["screen"], 4);
        assert_eq!(init.last_part_number["mic_audio"], 3);
    }

    #[test]
    fn fixture_session_recording_initialized_new() {
        let init: SessionInitialized = roundtrip_test(
            "session_recording_initialized_new.json",
            EventType::SessionRecordingInitialized,
        );
        assert_eq!(init.status, Some(RecordingStatus::New));
        assert!(init.last_part_number.is_empty());
    }

    #[test]
    fn fixture_session_recording_initialized_null_checkpoint() {
        let msg =
            Message::from_text(&load_text("session_recording_initialized_null_checkpoint.json"))
                .unwrap();
        assert_eq!(msg.event, EventType::SessionRecordingInitialized);
        let init: SessionInitialized = msg.require_data().unwrap();
        assert_eq!(init.asset_id, 5);
        assert!(init.last_part_number.is_empty());

        // A null checkpoint is re-encoded by omitting the field.
        let reencoded = serde_json::to_value(&init).unwrap();
        assert!(reencoded.get("last_part_number").is_none());
    }

    #[test]
    fn fixture_ready_for_binary() {
        let ready: ReadyForBinary =
            roundtrip_test("ready_for_binary.json", EventType::ReadyForBinary);
        assert_eq!(ready.stream_id, "screen");
        assert_eq!(ready.part_number, 5);
    }

    #[test]
    fn fixture_chunk_ack() {
        let ack: ChunkAck = roundtrip_test("chunk_ack.json", EventType::ChunkAck);
        assert_eq!(ack.etag, "\"9b2cf535f27731c974343645a3985328\"");
    }

    #[test]
    fn fixture_chunk_nack() {
        let nack: ChunkNack = roundtrip_test("chunk_nack.json", EventType::ChunkNack);
        assert_eq!(nack.error, "checksum mismatch");
    }

    #[test]
    fn fixture_upload_complete() {
        let done: UploadComplete = roundtrip_test("upload_complete.json", EventType::UploadComplete);
        assert_eq!(done.asset_id, Some(5521));
    }

    #[test]
    fn fixture_session_status_response() {
        let status: SessionStatusResponse = roundtrip_test(
            "session_status_response.json",
            EventType::SessionStatusResponse,
        );
        assert_eq!(status.streams["screen"].part_count, 5);
        assert_eq!(status.streams["mic_audio"].total_size, 320_000);
    }

    #[test]
    fn fixture_error() {
        let err: ServerError = roundtrip_test("error.json", EventType::Error);
        assert_eq!(err.message, "asset 5521 is locked");
    }

    #[test]
    fn fixture_unknown_event_is_tolerated() {
        let msg = Message::from_text(&load_text("unknown_event.json")).unwrap();
        assert_eq!(msg.event, EventType::Unknown);
        assert!(msg.data.is_some());
    }

    #[test]
    fn every_fixture_is_an_envelope() {
        let mut count = 0;
        for entry in fs::read_dir(fixtures_dir()).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            let obj = value.as_object().unwrap();
            assert!(obj.contains_key("event"), "{} has no event", path.display());
            assert!(
                obj.keys().all(|k| k == "event" || k == "data"),
                "{} has extra envelope keys",
                path.display()
            );
            count += 1;
        }
        assert!(count >= 14);
    }
}
