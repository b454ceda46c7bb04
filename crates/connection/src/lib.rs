//! Connection transport for the ingestion channel.
//!
//! Provides the [`Transport`] seam the session engine talks to, and a
//! WebSocket implementation with read/write/ping pumps that turns inbound
//! frames into [`TransportEvent`]s.

mod pumps;
pub mod transport;
pub mod ws;

pub use transport::{Transport, TransportError, TransportEvent, TransportFuture};
pub use ws::{WsTransport, endpoint_url};
