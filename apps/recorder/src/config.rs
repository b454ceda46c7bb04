//! Recorder configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/uplink/recorder.toml`
//! - Windows: `%APPDATA%/uplink/recorder.toml`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use uplink_capture::{AdapterConfig, CaptureSurface};
use uplink_protocol::OutputFormat;
use uplink_session::{EngineSettings, RecorderSettings};
use uplink_transfer::RetryPolicy;

/// Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the ingestion server.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP endpoint that issues connection credentials per session.
    #[serde(default)]
    pub provisioning_url: Option<String>,

    /// Static connection id, used when no provisioning URL is set.
    #[serde(default)]
    pub connection_id: String,

    /// Static connection token, used when no provisioning URL is set.
    #[serde(default)]
    pub connection_token: String,

    /// Length of one capture cycle in seconds.
    #[serde(default = "default_chunk_interval")]
    pub chunk_interval_secs: u64,

    /// Pause between two capture cycles in milliseconds.
    #[serde(default = "default_restart_gap")]
    pub restart_gap_ms: u64,

    /// How long queued segments keep uploading after a stop, in seconds.
    #[serde(default = "default_drain_grace")]
    pub drain_grace_secs: u64,

    /// How long to wait for the server to confirm the upload, in seconds.
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    /// Times a rejected segment is announced again (0 = drop it).
    #[serde(default)]
    pub retry_attempts: u32,

    /// Interval for server status requests in seconds (0 = never).
    #[serde(default)]
    pub status_interval_secs: u64,

    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    #[serde(default = "default_file_mime_type")]
    pub file_mime_type: String,

    /// Streams to capture.
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
}

/// One captured stream: a command whose stdout is the segment payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_surface")]
    pub surface: CaptureSurface,
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8080/ws/recording".into()
}

fn default_chunk_interval() -> u64 {
    5
}

fn default_restart_gap() -> u64 {
    100
}

fn default_drain_grace() -> u64 {
    5
}

fn default_completion_timeout() -> u64 {
    30
}

fn default_file_extension() -> String {
    "webm".into()
}

fn default_file_mime_type() -> String {
    "video/webm".into()
}

fn default_surface() -> CaptureSurface {
    CaptureSurface::Monitor { display_id: None }
}

fn default_streams() -> Vec<StreamConfig> {
    let args = [
        "-loglevel", "error", "-f", "x11grab", "-i", ":0", "-c:v", "libvpx", "-f", "webm",
        "pipe:1",
    ];
    vec![StreamConfig {
        id: "screen".into(),
        command: "ffmpeg".into(),
        args: args.iter().map(|a| a.to_string()).collect(),
        surface: default_surface(),
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            provisioning_url: None,
            connection_id: String::new(),
            connection_token: String::new(),
            chunk_interval_secs: default_chunk_interval(),
            restart_gap_ms: default_restart_gap(),
            drain_grace_secs: default_drain_grace(),
            completion_timeout_secs: default_completion_timeout(),
            retry_attempts: 0,
            status_interval_secs: 0,
            file_extension: default_file_extension(),
            file_mime_type: default_file_mime_type(),
            streams: default_streams(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or writes and returns the default
    /// if the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The file may carry a connection token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects configurations the recorder cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.is_empty() {
            bail!("endpoint must not be empty");
        }
        if self.chunk_interval_secs == 0 {
            bail!("chunk_interval_secs must be at least 1");
        }
        if self.completion_timeout_secs == 0 {
            bail!("completion_timeout_secs must be at least 1");
        }
        if self.streams.is_empty() {
            bail!("no streams configured");
        }
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.id.is_empty() || stream.command.is_empty() {
                bail!("every stream needs an id and a command");
            }
            if !seen.insert(stream.id.as_str()) {
                bail!("duplicate stream id {:?}", stream.id);
            }
        }
        Ok(())
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            engine: EngineSettings {
                format: OutputFormat {
                    file_extension: self.file_extension.clone(),
                    file_mime_type: self.file_mime_type.clone(),
                },
                retry: RetryPolicy {
                    max_attempts: self.retry_attempts,
                },
            },
            adapter: AdapterConfig {
                interval: Duration::from_secs(self.chunk_interval_secs),
                restart_gap: Duration::from_millis(self.restart_gap_ms),
            },
            drain_grace: Duration::from_secs(self.drain_grace_secs),
            completion_timeout: Duration::from_secs(self.completion_timeout_secs),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("uplink")
            .join("recorder.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("uplink").join("recorder.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/uplink/recorder.toml"))
    }
}
