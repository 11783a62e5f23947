//! WebSocket support: RFC 6455 frame codec, the upgrade handshake
//! derivation, and the post-upgrade channel with heartbeat.

mod channel;
mod frame;
mod handshake;

pub use channel::{WebSocketChannel, WsEndpoint, WsMessage};
pub use frame::{FrameCodec, Opcode, WsFrame};
pub use handshake::{accept_key, select_subprotocol};

pub(crate) use channel::session;
