//! Application orchestrator: provisions credentials, connects, and runs one
//! recording session until Ctrl-C or until the server closes it.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

use uplink_capture::{CaptureAdmission, CommandSource, RequireFullDisplay};
use uplink_session::{
    CredentialProvider, DropReason, Recorder, SessionEvent, StaticCredentials, StreamSource,
};

use crate::config::Config;
use crate::provision::HttpProvisioner;

/// Runs one recording session for `session_id`.
pub async fn run(config: Config, session_id: String) -> anyhow::Result<()> {
    // -- Capture sources --
    let sources = build_sources(&config, &RequireFullDisplay)?;

    // -- Credentials --
    let provider = credential_provider(&config)?;
    let credentials = provider
        .provision(&session_id)
        .await
        .context("could not obtain connection credentials")?;

    // -- Connection and session --
    let recorder = Recorder::connect(
        &config.endpoint,
        credentials,
        sources,
        config.recorder_settings(),
    )
    .await
    .with_context(|| format!("could not connect to {}", config.endpoint))?;
    let mut events = recorder.subscribe();
    let handle = recorder.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;
    let mut aborting = false;

    let status_enabled = config.status_interval_secs > 0;
    let mut status_tick =
        tokio::time::interval(Duration::from_secs(config.status_interval_secs.max(1)));
    status_tick.tick().await;

    loop {
        tokio::select! {
            _ = &mut ctrl_c, if !aborting => {
                if stopping {
                    tracing::warn!("second interrupt received, aborting upload");
                    aborting = true;
                    handle.abort().await;
                } else {
                    tracing::info!("interrupt received, stopping capture (interrupt again to abort)");
                    stopping = true;
                    handle.stop().await;
                    ctrl_c.set(tokio::signal::ctrl_c());
                }
            }
            _ = status_tick.tick(), if status_enabled => {
                handle.request_status().await;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    if let SessionEvent::StateChanged(state) = event {
                        if state.is_terminal() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event log fell behind");
                    if handle.is_finished() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let summary = handle.wait().await?;
    for (stream, stats) in &summary.streams {
        tracing::info!(
            stream = %stream,
            acked = stats.acked,
            rejected = stats.rejected,
            dropped = stats.dropped,
            bytes = stats.bytes_acked,
            "stream summary"
        );
    }

    let summary = summary.into_result()?;
    tracing::info!(asset_id = ?summary.asset_id, "recording uploaded");
    Ok(())
}

/// Checks every configured surface and builds one process source per stream.
fn build_sources(
    config: &Config,
    admission: &dyn CaptureAdmission,
) -> anyhow::Result<Vec<StreamSource>> {
    config
        .streams
        .iter()
        .map(|stream| {
            StreamSource::admitted(
                stream.id.clone(),
                CommandSource::new(stream.command.clone(), stream.args.clone()),
                &stream.surface,
                admission,
            )
            .with_context(|| format!("stream {:?} cannot be recorded", stream.id))
        })
        .collect()
}

fn credential_provider(config: &Config) -> anyhow::Result<Box<dyn CredentialProvider>> {
    match &config.provisioning_url {
        Some(url) => Ok(Box::new(HttpProvisioner::new(url.clone())?)),
        None => Ok(Box::new(StaticCredentials::new(
            config.connection_id.clone(),
            config.connection_token.clone(),
        ))),
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => {
            tracing::info!(state = %state, "session state changed");
        }
        SessionEvent::SegmentQueued {
            stream_id,
            part_number,
            size,
        } => {
            tracing::debug!(stream = %stream_id, part = part_number, size, "segment queued");
        }
        SessionEvent::SegmentUploaded {
            stream_id,
            part_number,
            etag,
        } => {
            tracing::info!(stream = %stream_id, part = part_number, etag = %etag, "segment uploaded");
        }
        SessionEvent::SegmentRejected {
            stream_id,
            part_number,
            error,
            retrying,
        } => {
            tracing::warn!(
                stream = %stream_id,
                part = part_number,
                retrying,
                "segment rejected: {error}"
            );
        }
        SessionEvent::SegmentDropped {
            stream_id,
            part_number,
            reason,
        } => {
            let reason = match reason {
                DropReason::NotReady => "connection not ready".to_string(),
                DropReason::LocalFailure(e) => e.clone(),
                DropReason::TransportLost => "connection lost".to_string(),
            };
            tracing::warn!(stream = %stream_id, part = part_number, "segment dropped: {reason}");
        }
        SessionEvent::CaptureFailed { stream_id, reason } => {
            tracing::error!(stream = %stream_id, "capture failed, stopping: {reason}");
        }
        SessionEvent::TransportFailed(reason) => {
            tracing::error!("connection failed: {reason}");
        }
        SessionEvent::StatusReport(streams) => {
            for (stream, status) in streams {
                tracing::info!(
                    stream = %stream,
                    parts = status.part_count,
                    bytes = status.total_size,
                    "server status"
                );
            }
        }
        SessionEvent::ServerError(message) => {
            tracing::warn!("server error: {message}");
        }
        SessionEvent::Completed { asset_id, message } => {
            tracing::info!(asset_id = ?asset_id, "upload complete: {message}");
        }
    }
}
