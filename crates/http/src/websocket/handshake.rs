//! The server side of the WebSocket opening handshake,
//! [RFC 6455 §4.2](https://www.rfc-editor.org/rfc/rfc6455#section-4.2).

use base64::Engine;
use sha1::{Digest, Sha1};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derives `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`:
/// Base64(SHA1(key ∥ GUID)).
pub fn accept_key(sec_websocket_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sec_websocket_key.as_bytes());
    hasher.update(GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Picks the subprotocol to echo back: the first entry of the client's
/// comma-separated `Sec-WebSocket-Protocol` list.
pub fn select_subprotocol(offered: &str) -> Option<&str> {
    offered.split(',').map(str::trim).find(|candidate| !candidate.is_empty())
}
