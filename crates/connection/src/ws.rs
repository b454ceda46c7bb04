//! WebSocket transport to the ingestion service.
//!
//! One connection per session. Frames are written by a dedicated pump in
//! the order they are queued, inbound frames are decoded by the read pump
//! and delivered as [`TransportEvent`]s.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use uplink_protocol::constants::{WS_CLOSE_NORMAL, WS_MAX_MESSAGE_SIZE, WS_SEND_BUFFER};
use uplink_protocol::envelope::Message;

use crate::transport::{Transport, TransportError, TransportEvent, TransportFuture};

/// Builds the connection URL: `<endpoint>?connection_id=<encoded id>`.
pub fn endpoint_url(endpoint: &str, connection_id: &str) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{endpoint}{sep}connection_id={}",
        utf8_percent_encode(connection_id, NON_ALPHANUMERIC)
    )
}

/// WebSocket connection implementing [`Transport`].
pub struct WsTransport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    /// Opens a connection and starts the pumps.
    ///
    /// The returned receiver yields every inbound event. It ends with a
    /// single `Closed` or `Failed` event.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        debug!(%url, "connected");
        Ok(Self::from_stream(ws_stream))
    }

    /// Wraps an already established WebSocket stream.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>) -> (Self, mpsc::Receiver<TransportEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WS_SEND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(WS_SEND_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let write_handle = {
            let open = open.clone();
            let event_tx = event_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(
                write, write_rx, open, event_tx, cancel,
            ))
        };

        let read_handle = {
            let open = open.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, event_tx, open, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        let transport = Self {
            write_tx,
            open,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        };
        (transport, event_rx)
    }

    async fn queue(&self, frame: tungstenite::Message) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.write_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl Transport for WsTransport {
    fn send_text(&mut self, message: &Message) -> TransportFuture<'_> {
        let text = message.to_text();
        Box::pin(async move {
            let text = text?;
            self.queue(tungstenite::Message::Text(text.into())).await
        })
    }

    fn send_binary(&mut self, data: Bytes) -> TransportFuture<'_> {
        Box::pin(self.queue(tungstenite::Message::Binary(data)))
    }

    fn close(&mut self) -> TransportFuture<'_> {
        Box::pin(async move {
            if !self.open.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            debug!("closing connection");
            let frame = CloseFrame {
                code: CloseCode::from(WS_CLOSE_NORMAL),
                reason: "".into(),
            };
            self.write_tx
                .send(tungstenite::Message::Close(Some(frame)))
                .await
                .map_err(|_| TransportError::Closed)
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}
