//! Auto-restarting capture cycles for one stream.
//!
//! The adapter is a small state machine:
//! `Idle → Capturing → Finalizing → Capturing | Idle | Terminated`.
//! Cycles are timed with `tokio::time`, so tests drive them with a paused
//! clock instead of real timers.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uplink_protocol::constants::{DEFAULT_CHUNK_INTERVAL, DEFAULT_RESTART_GAP};

use crate::CaptureError;
use crate::source::CaptureSource;

/// Lifecycle state of a [`SourceAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not capturing (before the first cycle or after a stop).
    Idle,
    /// A cycle is running.
    Capturing,
    /// The cycle is being cut into a segment.
    Finalizing,
    /// The source failed; no further cycles.
    Terminated,
}

/// Cycle timing.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Length of one capture cycle.
    pub interval: Duration,
    /// Pause between two cycles so the source can start a fresh,
    /// independently decodable unit.
    pub restart_gap: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHUNK_INTERVAL,
            restart_gap: DEFAULT_RESTART_GAP,
        }
    }
}

/// The bytes of one finished cycle, not yet numbered.
#[derive(Debug, Clone)]
pub struct CapturedSegment {
    pub stream_id: String,
    pub payload: Bytes,
    pub captured_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Events emitted by adapters to the owning session.
#[derive(Debug)]
pub enum AdapterEvent {
    /// A cycle produced a non-empty segment.
    Segment(CapturedSegment),
    /// The adapter finished its last cycle after a stop request.
    Stopped { stream_id: String },
    /// The source ended unexpectedly; the whole session must stop.
    Terminated { stream_id: String, reason: String },
}

enum CycleEnd {
    Elapsed,
    Stopped,
    SourceEnded(CaptureError),
}

/// Runs capture cycles for one stream.
pub struct SourceAdapter<S> {
    stream_id: String,
    source: S,
    config: AdapterConfig,
    events: mpsc::Sender<AdapterEvent>,
    stop: CancellationToken,
    state: watch::Sender<AdapterState>,
}

impl<S: CaptureSource + 'static> SourceAdapter<S> {
    pub fn new(
        stream_id: impl Into<String>,
        source: S,
        config: AdapterConfig,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Self {
        let (state, _) = watch::channel(AdapterState::Idle);
        Self {
            stream_id: stream_id.into(),
            source,
            config,
            events,
            stop: CancellationToken::new(),
            state,
        }
    }

    /// Starts the restart loop on its own task.
    pub fn spawn(self) -> AdapterHandle {
        let handle_stop = self.stop.clone();
        let state = self.state.subscribe();
        let stream_id = self.stream_id.clone();
        let task = tokio::spawn(self.run());
        AdapterHandle {
            stream_id,
            stop: handle_stop,
            state,
            task,
        }
    }

    /// Runs cycles until stopped or the source fails. Returns the final state.
    pub async fn run(mut self) -> AdapterState {
        info!(stream = %self.stream_id, interval = ?self.config.interval, "capture started");

        let outcome = loop {
            match self.cycle().await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }

            tokio::select! {
                _ = self.stop.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.restart_gap) => {}
            }
        };

        match outcome {
            Ok(()) => {
                self.state.send_replace(AdapterState::Idle);
                info!(stream = %self.stream_id, "capture stopped");
                let _ = self
                    .events
                    .send(AdapterEvent::Stopped {
                        stream_id: self.stream_id.clone(),
                    })
                    .await;
                AdapterState::Idle
            }
            Err(err) => {
                warn!(stream = %self.stream_id, error = %err, "capture source terminated");
                self.state.send_replace(AdapterState::Terminated);
                let _ = self
                    .events
                    .send(AdapterEvent::Terminated {
                        stream_id: self.stream_id.clone(),
                        reason: err.to_string(),
                    })
                    .await;
                AdapterState::Terminated
            }
        }
    }

    /// Runs one cycle. `Ok(true)` means another cycle should follow.
    async fn cycle(&mut self) -> Result<bool, CaptureError> {
        if self.stop.is_cancelled() {
            return Ok(false);
        }

        let captured_at = Utc::now();
        let started = Instant::now();
        self.source.begin().await?;
        self.state.send_replace(AdapterState::Capturing);

        let end = tokio::select! {
            _ = tokio::time::sleep(self.config.interval) => CycleEnd::Elapsed,
            _ = self.stop.cancelled() => CycleEnd::Stopped,
            err = self.source.ended() => CycleEnd::SourceEnded(err),
        };

        self.state.send_replace(AdapterState::Finalizing);
        let duration = match end {
            CycleEnd::Elapsed => self.config.interval,
            _ => started.elapsed().min(self.config.interval),
        };

        match self.source.finish().await {
            Ok(bytes) if bytes.is_empty() => {
                debug!(stream = %self.stream_id, "cycle produced no data, skipping");
            }
            Ok(bytes) => {
                debug!(stream = %self.stream_id, size = bytes.len(), ?duration, "cycle finalized");
                let segment = CapturedSegment {
                    stream_id: self.stream_id.clone(),
                    payload: Bytes::from(bytes),
                    captured_at,
                    duration,
                };
                if self.events.send(AdapterEvent::Segment(segment)).await.is_err() {
                    debug!(stream = %self.stream_id, "session gone, stopping capture");
                    return Ok(false);
                }
            }
            Err(err) => {
                // A source that already ended reports why it ended, not
                // why finalization failed afterwards.
                return Err(match end {
                    CycleEnd::SourceEnded(original) => original,
                    _ => err,
                });
            }
        }

        match end {
            CycleEnd::Elapsed => Ok(!self.stop.is_cancelled()),
            CycleEnd::Stopped => Ok(false),
            CycleEnd::SourceEnded(err) => Err(err),
        }
    }
}

/// Control handle for a spawned adapter.
pub struct AdapterHandle {
    stream_id: String,
    stop: CancellationToken,
    state: watch::Receiver<AdapterState>,
    task: JoinHandle<AdapterState>,
}

impl AdapterHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Marks the adapter inactive. The running cycle still finalizes and
    /// emits its last segment; no new cycle starts.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn state(&self) -> AdapterState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the adapter task to end and returns its final state.
    pub async fn join(self) -> AdapterState {
        self.task.await.unwrap_or(AdapterState::Terminated)
    }
}
