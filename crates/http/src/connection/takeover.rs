//! Connection take-over directives.
//!
//! A handler that needs more than request/response semantics (a protocol
//! switch, a raw proxy tunnel) attaches a [`Takeover`] to its response
//! extensions. The connection driver executes the directive after sending
//! the response (for a tunnel, instead of sending it), because only the
//! driver owns the transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::websocket::WsEndpoint;

/// What the connection should become once the current exchange ends.
pub enum TakeoverKind {
    /// Switch to a WebSocket session driven by the given endpoint.
    WebSocket { endpoint: Arc<dyn WsEndpoint>, ping_interval: Option<Duration> },

    /// Hand the transport to the delegated HTTP/2 machinery (h2c upgrade).
    Http2,

    /// Become a raw bidirectional tunnel to `upstream`. `head` is the
    /// rewritten request head to forward before piping begins; any
    /// already-buffered request bytes follow it. The timeouts bound each
    /// piping direction's inactivity window.
    Tunnel {
        upstream: TcpStream,
        head: Bytes,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    },
}

/// Cloneable cell carrying a [`TakeoverKind`] through `http::Extensions`
/// (which requires `Clone`). The directive itself can be taken exactly
/// once.
#[derive(Clone)]
pub struct Takeover {
    cell: Arc<Mutex<Option<TakeoverKind>>>,
}

impl Takeover {
    pub fn new(kind: TakeoverKind) -> Self {
        Self { cell: Arc::new(Mutex::new(Some(kind))) }
    }

    pub fn websocket(endpoint: Arc<dyn WsEndpoint>, ping_interval: Option<Duration>) -> Self {
        Self::new(TakeoverKind::WebSocket { endpoint, ping_interval })
    }

    pub fn http2() -> Self {
        Self::new(TakeoverKind::Http2)
    }

    pub fn tunnel(
        upstream: TcpStream,
        head: Bytes,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self::new(TakeoverKind::Tunnel { upstream, head, read_timeout, write_timeout })
    }

    pub(crate) fn take(&self) -> Option<TakeoverKind> {
        self.cell.lock().ok().and_then(|mut guard| guard.take())
    }
}

impl std::fmt::Debug for Takeover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.cell.lock() {
            Ok(guard) => match &*guard {
                Some(TakeoverKind::WebSocket { .. }) => "WebSocket",
                Some(TakeoverKind::Http2) => "Http2",
                Some(TakeoverKind::Tunnel { .. }) => "Tunnel",
                None => "taken",
            },
            Err(_) => "poisoned",
        };
        f.debug_tuple("Takeover").field(&kind).finish()
    }
}
