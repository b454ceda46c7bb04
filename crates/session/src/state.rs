use std::fmt;

/// Lifecycle of one recording session.
///
/// ```text
/// Disconnected -> Authenticating -> Initializing -> Active -> Draining -> Completed
/// ```
///
/// Any state before `Completed` can fall into `Aborted` when the
/// connection fails or closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection not yet announced.
    Disconnected,
    /// `authenticate` sent, waiting for `authenticated`.
    Authenticating,
    /// `initialize_session_recording` sent, waiting for the asset id.
    Initializing,
    /// Capturing and uploading.
    Active,
    /// Capture stopped; queued segments still flow until the grace period ends.
    Draining,
    /// The server confirmed the upload.
    Completed,
    /// The connection was lost before completion.
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Returns `true` once nothing else can happen in the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns `true` while segments may be uploaded.
    pub fn is_uploading(&self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
