//! Protocol core for the ferry HTTP server.
//!
//! One [`connection::HttpConnection`] is bound to one accepted transport
//! connection and drives it through protocol detection, incremental HTTP/1.x
//! request decoding, response framing, and mid-connection protocol take-over
//! (WebSocket, HTTP/2, raw proxy tunnel). The service layer plugs in through
//! the [`handler::Handler`] trait.

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod websocket;

pub(crate) mod utils;
