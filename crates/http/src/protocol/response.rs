//! Response head handling.

use http::Response;

/// The head portion of an HTTP response: `http::Response<()>` with an empty
/// body placeholder, attached to payload frames by the encoder.
pub type ResponseHead = Response<()>;
