//! WebSocket frame codec,
//! [RFC 6455 §5](https://www.rfc-editor.org/rfc/rfc6455#section-5).
//!
//! The decoder accepts client frames (which must be masked) and unmasks
//! them; the encoder writes server frames (never masked).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{ParseError, SendError};

const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single decoded (or to-be-encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl WsFrame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { fin: true, opcode, payload: payload.into() }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    pub fn close() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }
}

pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = WsFrame;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let b0 = src[0];
        let b1 = src[1];

        let fin = b0 & 0x80 != 0;
        if b0 & 0x70 != 0 {
            return Err(ParseError::invalid_body("websocket reserved bits set"));
        }
        let opcode = Opcode::from_u8(b0 & 0x0f)
            .ok_or_else(|| ParseError::invalid_body(format!("unknown websocket opcode {:#x}", b0 & 0x0f)))?;

        let masked = b1 & 0x80 != 0;
        if !masked {
            // server-side: client frames must be masked
            return Err(ParseError::invalid_body("client websocket frame not masked"));
        }

        let (payload_len, header_len) = match (b1 & 0x7f) as usize {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([src[2], src[3]]) as usize, 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut be = [0u8; 8];
                be.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(be);
                if len > MAX_PAYLOAD as u64 {
                    return Err(ParseError::invalid_body("websocket payload too large"));
                }
                (len as usize, 10)
            }
            n => (n, 2),
        };

        if payload_len > MAX_PAYLOAD {
            return Err(ParseError::invalid_body("websocket payload too large"));
        }
        if opcode.is_control() && (payload_len > 125 || !fin) {
            return Err(ParseError::invalid_body("invalid websocket control frame"));
        }

        let total = header_len + 4 + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut mask = [0u8; 4];
        mask.copy_from_slice(&src[..4]);
        src.advance(4);

        let mut payload = src.split_to(payload_len);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        Ok(Some(WsFrame { fin, opcode, payload: payload.freeze() }))
    }
}

impl Encoder<WsFrame> for FrameCodec {
    type Error = SendError;

    fn encode(&mut self, frame: WsFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = frame.payload.len();
        dst.reserve(10 + len);

        let b0 = (frame.fin as u8) << 7 | frame.opcode.as_u8();
        dst.put_u8(b0);

        match len {
            0..=125 => dst.put_u8(len as u8),
            126..=65535 => {
                dst.put_u8(126);
                dst.put_u16(len as u16);
            }
            _ => {
                dst.put_u8(127);
                dst.put_u64(len as u64);
            }
        }

        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
