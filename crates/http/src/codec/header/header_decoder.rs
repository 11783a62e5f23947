use std::mem::MaybeUninit;

use bytes::{Buf, BytesMut};
use http::HeaderValue;
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::protocol::{ParseError, RequestHeader};
use crate::utils::ensure;

const MAX_HEADER_NUM: usize = 64;
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes a request head from the connection buffer and derives the
/// payload decoder for the body that follows it.
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadDecoder);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] =
            unsafe { MaybeUninit::uninit().assume_init() };

        let parsed_result = req.parse_with_uninit_headers(src.as_ref(), &mut headers).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        match parsed_result {
            Status::Complete(body_offset) => {
                trace!(body_offset, "parsed request head");
                ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

                let header: RequestHeader = req.into();
                let payload_decoder = parse_payload(&header)?;

                src.advance(body_offset);
                Ok(Some((header, payload_decoder)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Derives the payload framing from the request head, per
/// [RFC 7230 §3.3](https://www.rfc-editor.org/rfc/rfc7230#section-3.3).
fn parse_payload(header: &RequestHeader) -> Result<PayloadDecoder, ParseError> {
    if !header.need_body() {
        return Ok(PayloadDecoder::empty());
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadDecoder::empty()),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadDecoder::chunked())
            } else {
                Ok(PayloadDecoder::empty())
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("not visible ascii"))?;
            let length = cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(cl_str))?;
            Ok(PayloadDecoder::length(length))
        }

        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
    }
}

/// Chunked framing applies only when `chunked` is the final listed
/// transfer coding.
fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    header_value
        .and_then(|value| value.to_str().ok())
        .and_then(|encodings| encodings.rsplit(',').next())
        .map(|last_encoding| last_encoding.trim() == "chunked")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Version};
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip, chunked".parse().unwrap());
        assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
    }

    #[test]
    fn consumes_head_leaves_body() {
        let str = indoc! {r##"
        POST /submit HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##};

        let mut bytes = BytesMut::from(str);
        let (header, payload_decoder) = HeaderDecoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(header.method(), &Method::POST);
        assert!(!payload_decoder.is_empty());
        assert_eq!(&bytes[..], b"123");
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_decoder) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_decoder.is_empty());
        assert!(buf.is_empty());

        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
    }

    #[test]
    fn partial_head_requests_more_data() {
        let mut buf = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: 127.0");
        assert!(HeaderDecoder.decode(&mut buf).unwrap().is_none());
        // nothing consumed while incomplete
        assert_eq!(buf.len(), 37);
    }

    #[test]
    fn conflicting_framing_rejected() {
        let str = indoc! {r##"
        POST /x HTTP/1.1
        Transfer-Encoding: chunked
        Content-Length: 3

        "##};

        let mut buf = BytesMut::from(str);
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }
}
