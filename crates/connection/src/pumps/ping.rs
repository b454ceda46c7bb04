//! WebSocket ping pump.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use uplink_protocol::constants::WS_PING_PERIOD;

/// Sends periodic pings so idle periods between segments keep the
/// connection alive.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ping = tungstenite::Message::Ping(Vec::new().into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
