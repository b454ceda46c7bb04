//! WebSocket write pump. Serialises outbound frames in queue order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::transport::TransportEvent;

/// Writes queued frames to the WebSocket.
///
/// Frames already queued are written before a cancellation is honoured.
/// A write failure marks the connection closed and is reported as
/// [`TransportEvent::Failed`].
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    open: Arc<AtomicBool>,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        let closing = matches!(m, tungstenite::Message::Close(_));
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            open.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(TransportEvent::Failed(e.to_string())).await;
                            cancel.cancel();
                            return;
                        }
                        if closing {
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
