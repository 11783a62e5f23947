pub mod body;
mod error;
mod message;
mod request;
mod response;

pub use error::{HttpError, ParseError, SendError};
pub use message::{Message, PayloadItem, PayloadSize};
pub use request::{ClientAddr, RequestHeader, Secure};
pub use response::ResponseHead;
