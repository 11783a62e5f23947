use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};
use http::{header, Version};
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Serializes a response head, fixing up the framing headers from the
/// payload size.
///
/// An explicit `Content-Length` on a payload-less response is preserved, so
/// HEAD responses keep the entity length of the resource they describe.
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut header, payload_size) = item;

        dst.reserve(INIT_HEADER_SIZE);
        match header.version() {
            Version::HTTP_11 => dst.put_slice(b"HTTP/1.1 "),
            Version::HTTP_10 => dst.put_slice(b"HTTP/1.0 "),
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        }
        dst.put_slice(header.status().as_str().as_bytes());
        dst.put_slice(b" ");
        dst.put_slice(header.status().canonical_reason().unwrap_or("Unknown").as_bytes());
        dst.put_slice(b"\r\n");

        match payload_size {
            PayloadSize::Length(n) => match header.headers_mut().get_mut(header::CONTENT_LENGTH) {
                Some(value) => *value = n.into(),
                None => {
                    header.headers_mut().insert(header::CONTENT_LENGTH, n.into());
                }
            },
            PayloadSize::Chunked => {
                header.headers_mut().remove(header::CONTENT_LENGTH);
                header.headers_mut().insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
            }
            PayloadSize::Empty => {
                // 1xx/204/304 forbid a body; announcing one would be wrong
                let status = header.status();
                let never_has_body = status.is_informational()
                    || status == http::StatusCode::NO_CONTENT
                    || status == http::StatusCode::NOT_MODIFIED;
                if !never_has_body && !header.headers().contains_key(header::CONTENT_LENGTH) {
                    header.headers_mut().insert(header::CONTENT_LENGTH, 0.into());
                }
            }
        }

        for (header_name, header_value) in header.headers().iter() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn length_framing_sets_content_length() {
        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        let raw = encode(head, PayloadSize::Length(2));
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("content-length: 2\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[test]
    fn empty_framing_preserves_explicit_content_length() {
        // a HEAD response advertises the entity length without a payload
        let head = Response::builder().status(StatusCode::OK).header(header::CONTENT_LENGTH, 1048576).body(()).unwrap();
        let raw = encode(head, PayloadSize::Empty);
        assert!(raw.contains("content-length: 1048576\r\n"));
    }

    #[test]
    fn empty_framing_defaults_content_length_zero() {
        let head = Response::builder().status(StatusCode::NOT_FOUND).body(()).unwrap();
        let raw = encode(head, PayloadSize::Empty);
        assert!(raw.contains("content-length: 0\r\n"));
    }

    #[test]
    fn interim_and_not_modified_get_no_content_length() {
        let head = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS).body(()).unwrap();
        assert!(!encode(head, PayloadSize::Empty).contains("content-length"));

        let head = Response::builder().status(StatusCode::NOT_MODIFIED).body(()).unwrap();
        assert!(!encode(head, PayloadSize::Empty).contains("content-length"));
    }

    #[test]
    fn chunked_framing_sets_transfer_encoding() {
        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        let raw = encode(head, PayloadSize::Chunked);
        assert!(raw.contains("transfer-encoding: chunked\r\n"));
        assert!(!raw.contains("content-length"));
    }
}
