mod body_channel;
mod req_body;

pub(crate) use body_channel::{BodyReceiver, BodySender};
pub use req_body::ReqBody;
