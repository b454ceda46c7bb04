use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::TransferError;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Prepares a segment payload for transmission and returns its checksum.
///
/// Hashing runs on the blocking pool so a multi-megabyte segment does not
/// stall the runtime. The caller awaits it while holding the in-flight lock.
pub async fn checksum_payload(
    stream_id: &str,
    part_number: u64,
    payload: Bytes,
) -> Result<String, TransferError> {
    if payload.is_empty() {
        return Err(TransferError::EmptyPayload {
            stream_id: stream_id.to_string(),
            part_number,
        });
    }
    tokio::task::spawn_blocking(move || checksum_bytes(&payload))
        .await
        .map_err(|e| TransferError::Encoder(e.to_string()))
}
