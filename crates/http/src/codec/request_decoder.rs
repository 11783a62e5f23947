use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decodes a connection's inbound byte stream into a strict sequence of
/// request heads and payload items.
///
/// After a head is produced, subsequent calls run the payload decoder the
/// head declared until it reports EOF; only then is the next head parsed.
/// This is what keeps pipelined requests strictly serial.
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // this request's payload is finished, back to head parsing
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_decoder)) => {
                let payload_size = payload_decoder.payload_size();
                // bodyless requests go straight back to head parsing, so
                // nothing has to drain an empty payload
                if !payload_size.is_empty() {
                    self.payload_decoder = Some(payload_decoder);
                }
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    #[test]
    fn head_then_payload_then_next_head() {
        let raw = indoc! {r##"
        POST /submit HTTP/1.1
        Host: x
        Content-Length: 5

        01234GET /next HTTP/1.1
        Host: x

        "##};

        let mut buf = BytesMut::from(raw);
        let mut decoder = RequestDecoder::new();

        let (header, payload_size) = match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Header(head) => head,
            Message::Payload(_) => panic!("expected head"),
        };
        assert_eq!(header.method(), &Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(5));

        let chunk = match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Payload(item) => item.into_bytes().unwrap(),
            Message::Header(_) => panic!("expected payload"),
        };
        assert_eq!(&chunk[..], b"01234");

        let item = match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Payload(item) => item,
            Message::Header(_) => panic!("expected eof"),
        };
        assert!(item.is_eof());

        let (header, payload_size) = match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Header(head) => head,
            Message::Payload(_) => panic!("expected second head"),
        };
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.uri().path(), "/next");
        assert!(payload_size.is_empty());
    }

    #[test]
    fn bodyless_heads_parse_back_to_back() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: x\r\n\r\nGET /2 HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut decoder = RequestDecoder::new();

        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(Message::Header(_))));
        // no payload item in between, the next head follows directly
        match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Header((header, _)) => assert_eq!(header.uri().path(), "/2"),
            Message::Payload(_) => panic!("bodyless request must not produce payload items"),
        }
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }
}
