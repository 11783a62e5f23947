use crate::codec::body::{ChunkedDecoder, LengthDecoder};
use crate::protocol::{ParseError, PayloadItem, PayloadSize};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decodes the payload that follows a request head, dispatching to the
/// framing the head declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(0)) }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    pub fn length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.kind, Kind::Length(decoder) if decoder.remaining() == 0)
    }

    /// The framing this decoder implements, as advertised to the body.
    pub fn payload_size(&self) -> PayloadSize {
        match &self.kind {
            Kind::Length(decoder) if decoder.remaining() == 0 => PayloadSize::Empty,
            Kind::Length(decoder) => PayloadSize::Length(decoder.remaining()),
            Kind::Chunked(_) => PayloadSize::Chunked,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
        }
    }
}
