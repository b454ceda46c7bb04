use serde::{Deserialize, Serialize};

/// Connection identifiers issued by the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Logical recording session (interview) identifier.
    pub session_id: String,
    pub connection_id: String,
    pub connection_token: String,
}

/// Container format announced when the session is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFormat {
    pub file_extension: String,
    pub file_mime_type: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            file_extension: "webm".into(),
            file_mime_type: "video/webm".into(),
        }
    }
}

/// Server-side bookkeeping for one stream, reported by `session_status_response`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    #[serde(default)]
    pub part_count: u64,
    #[serde(default)]
    pub total_size: u64,
}

/// Whether the server created a fresh asset or resumed an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    New,
    Resumed,
    #[serde(other)]
    Unknown,
}
