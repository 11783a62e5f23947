mod h2_connection;
mod http_connection;
mod sniff;
mod takeover;
mod tunnel;

pub use http_connection::HttpConnection;
pub use takeover::{Takeover, TakeoverKind};

pub(crate) use sniff::{sniff, Rewind, Sniff};
