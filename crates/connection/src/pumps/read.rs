//! WebSocket read pump. Decodes inbound frames into transport events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use uplink_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use uplink_protocol::envelope::Message;

use crate::transport::TransportEvent;

/// Reads frames from the WebSocket and forwards them as events.
///
/// Any inbound frame resets the liveness deadline. If nothing arrives
/// within [`WS_PONG_WAIT`] the connection is considered dead. The pump
/// always finishes with exactly one `Closed` or `Failed` event unless it
/// was cancelled by the owner.
pub(crate) async fn read_pump<S>(
    mut read: S,
    event_tx: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    let last = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                open.store(false, Ordering::SeqCst);
                return;
            }

            () = &mut pong_deadline => {
                warn!("pong timeout, connection dead");
                break TransportEvent::Failed("pong timeout".into());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if let Some(message) = decode_text(&text) {
                                    if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                                        open.store(false, Ordering::SeqCst);
                                        return;
                                    }
                                }
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                let (code, reason) = match frame {
                                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                    None => (None, String::new()),
                                };
                                debug!(?code, %reason, "received close frame");
                                break TransportEvent::Closed { code, reason };
                            }
                            tungstenite::Message::Binary(data) => {
                                debug!(len = data.len(), "ignoring inbound binary frame");
                            }
                            tungstenite::Message::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break TransportEvent::Failed(e.to_string());
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break TransportEvent::Closed { code: None, reason: String::new() };
                    }
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = event_tx.send(last).await;
    cancel.cancel();
}

/// Decodes a text frame. Oversized or malformed frames are dropped.
fn decode_text(text: &str) -> Option<Message> {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return None;
    }

    match Message::from_text(text) {
        Ok(m) => {
            trace!(event = ?m.event, "received message");
            Some(m)
        }
        Err(e) => {
            warn!("failed to parse message: {e}");
            None
        }
    }
}
