//! Decoder for `Transfer-Encoding: chunked` payloads,
//! [RFC 7230 §4.1](https://www.rfc-editor.org/rfc/rfc7230#section-4.1).

use crate::codec::body::chunked_decoder::ChunkedState::*;
use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Byte-at-a-time state machine over the chunked framing. Chunk data
/// itself is split out of the source buffer in whole available slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            match self.state.step(src, &mut self.remaining_size)? {
                (new_state, None) => {
                    self.state = new_state;
                }
                (new_state, Some(bytes)) => {
                    self.state = new_state;
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
            }
        }
    }
}

impl ChunkedState {
    fn step(&self, src: &mut BytesMut, remaining_size: &mut u64) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match self {
            Size => ChunkedState::read_size(src, remaining_size),
            SizeLws => ChunkedState::read_size_lws(src),
            Extension => ChunkedState::read_extension(src),
            SizeLf => ChunkedState::read_size_lf(src, remaining_size),
            Body => ChunkedState::read_body(src, remaining_size),
            BodyCr => ChunkedState::read_body_cr(src),
            BodyLf => ChunkedState::read_body_lf(src),
            Trailer => ChunkedState::read_trailer(src),
            TrailerLf => ChunkedState::read_trailer_lf(src),
            EndCr => ChunkedState::read_end_cr(src),
            EndLf => ChunkedState::read_end_lf(src),
            End => Ok((End, None)),
        }
    }

    fn read_size(src: &mut BytesMut, chunk_size: &mut u64) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(val) => val,
                    None => return Err(ParseError::invalid_body("chunk size overflow")),
                }
            };
        }

        let radix = 16;
        match src.get_u8() {
            b @ b'0'..=b'9' => {
                *chunk_size = or_overflow!(chunk_size.checked_mul(radix));
                *chunk_size = or_overflow!(chunk_size.checked_add((b - b'0') as u64));
            }
            b @ b'a'..=b'f' => {
                *chunk_size = or_overflow!(chunk_size.checked_mul(radix));
                *chunk_size = or_overflow!(chunk_size.checked_add((b + 10 - b'a') as u64));
            }
            b @ b'A'..=b'F' => {
                *chunk_size = or_overflow!(chunk_size.checked_mul(radix));
                *chunk_size = or_overflow!(chunk_size.checked_add((b + 10 - b'A') as u64));
            }
            b'\t' | b' ' => return Ok((SizeLws, None)),
            b';' => return Ok((Extension, None)),
            b'\r' => return Ok((SizeLf, None)),
            _ => return Err(ParseError::invalid_body("invalid chunk size line")),
        }

        Ok((Size, None))
    }

    fn read_size_lws(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        // whitespace may follow the chunk size, but no more digits can come
        match src.get_u8() {
            b'\t' | b' ' => Ok((SizeLws, None)),
            b';' => Ok((Extension, None)),
            b'\r' => Ok((SizeLf, None)),
            _ => Err(ParseError::invalid_body("invalid chunk size linear white space")),
        }
    }

    fn read_extension(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        // extensions are skipped up to the CRLF; a bare LF inside one is
        // rejected so sloppy peers cannot smuggle a line ending
        match src.get_u8() {
            b'\r' => Ok((SizeLf, None)),
            b'\n' => Err(ParseError::invalid_body("chunk extension contains newline")),
            _ => Ok((Extension, None)),
        }
    }

    fn read_size_lf(src: &mut BytesMut, chunk_size: &mut u64) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\n' => {
                if *chunk_size == 0 {
                    Ok((EndCr, None))
                } else {
                    Ok((Body, None))
                }
            }
            _ => Err(ParseError::invalid_body("invalid chunk size LF")),
        }
    }

    fn read_body(src: &mut BytesMut, chunk_size: &mut u64) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        if src.is_empty() {
            return Ok((Body, None));
        }

        if *chunk_size == 0 {
            return Ok((BodyCr, None));
        }

        let remaining = match *chunk_size {
            r if r > usize::MAX as u64 => usize::MAX,
            r => r as usize,
        };

        let read_size = std::cmp::min(remaining, src.len());

        *chunk_size -= read_size as u64;
        let bytes = src.split_to(read_size).freeze();

        if *chunk_size > 0 {
            Ok((Body, Some(bytes)))
        } else {
            Ok((BodyCr, Some(bytes)))
        }
    }

    fn read_body_cr(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\r' => Ok((BodyLf, None)),
            _ => Err(ParseError::invalid_body("invalid chunk body CR")),
        }
    }

    fn read_body_lf(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\n' => Ok((Size, None)),
            _ => Err(ParseError::invalid_body("invalid chunk body LF")),
        }
    }

    fn read_trailer(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\r' => Ok((TrailerLf, None)),
            _ => Ok((Trailer, None)),
        }
    }

    fn read_trailer_lf(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\n' => Ok((EndCr, None)),
            _ => Err(ParseError::invalid_body("invalid trailer end LF")),
        }
    }

    fn read_end_cr(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\r' => Ok((EndLf, None)),
            _ => Ok((Trailer, None)),
        }
    }

    fn read_end_lf(src: &mut BytesMut) -> Result<(ChunkedState, Option<Bytes>), ParseError> {
        match src.get_u8() {
            b'\n' => Ok((End, None)),
            _ => Err(ParseError::invalid_body("invalid chunk end LF")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_then_eof() {
        let mut buffer: BytesMut = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        let bytes = item.into_bytes().unwrap();
        assert_eq!(&bytes[..], b"1234567890abcdef");

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_eof());
    }

    #[test]
    fn chunk_split_across_reads() {
        let mut decoder = ChunkedDecoder::new();

        let mut buffer: BytesMut = BytesMut::from(&b"5\r\nhel"[..]);
        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&item.into_bytes().unwrap()[..], b"hel");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&item.into_bytes().unwrap()[..], b"lo");

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_eof());
    }

    #[test]
    fn rejects_invalid_size_line() {
        let mut buffer: BytesMut = BytesMut::from(&b"zz\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buffer).is_err());
    }
}
