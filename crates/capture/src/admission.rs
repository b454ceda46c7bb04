use serde::{Deserialize, Serialize};

use crate::CaptureError;

/// What a capture source is pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureSurface {
    /// A whole display.
    Monitor {
        #[serde(default)]
        display_id: Option<u32>,
    },
    /// A single application window.
    Window {
        #[serde(default)]
        title: String,
    },
    /// A browser tab or other partial surface.
    Browser,
    /// Not a screen surface (microphone, system audio, synthetic).
    Audio,
}

/// Decides whether a capture surface is acceptable before recording starts.
pub trait CaptureAdmission: Send + Sync {
    fn check(&self, surface: &CaptureSurface) -> Result<(), CaptureError>;
}

/// Admits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAny;

impl CaptureAdmission for AllowAny {
    fn check(&self, _surface: &CaptureSurface) -> Result<(), CaptureError> {
        Ok(())
    }
}

/// Screen sources must capture an entire display. Audio-only sources pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireFullDisplay;

impl CaptureAdmission for RequireFullDisplay {
    fn check(&self, surface: &CaptureSurface) -> Result<(), CaptureError> {
        match surface {
            CaptureSurface::Monitor { .. } | CaptureSurface::Audio => Ok(()),
            CaptureSurface::Window { title } => Err(CaptureError::Rejected(format!(
                "window capture ({title:?}) is not allowed, share the entire screen"
            ))),
            CaptureSurface::Browser => Err(CaptureError::Rejected(
                "browser tab capture is not allowed, share the entire screen".into(),
            )),
        }
    }
}
