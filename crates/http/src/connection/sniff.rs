//! Protocol detection on the first bytes of a connection.
//!
//! HTTP/2 prior knowledge is recognized by the client preface; anything
//! else must look like the start of an HTTP/1 request line (at least the
//! length of the smallest possible one, all printable) before the HTTP/1
//! machinery is set up.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::error;

use crate::protocol::ParseError;

pub(crate) const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Length of `GET / HTTP/1.1`, the smallest well-formed request line,
/// CRLF excluded.
const MIN_REQUEST_LINE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sniff {
    Http1,
    Http2,
}

/// Reads the first chunk off a fresh connection and decides the protocol.
/// The consumed bytes are left in `buf` for the chosen machinery to replay.
pub(crate) async fn sniff<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Sniff, ParseError>
where
    R: AsyncRead + Unpin,
{
    let n = reader.read_buf(buf).await.map_err(ParseError::io)?;
    if n == 0 {
        return Err(ParseError::invalid_request("connection closed before a request line"));
    }

    if buf.starts_with(HTTP2_PREFACE) || HTTP2_PREFACE.starts_with(&buf[..]) {
        return Ok(Sniff::Http2);
    }

    if buf.len() < MIN_REQUEST_LINE {
        error!(bytes = buf.len(), "first read shorter than a request line");
        return Err(ParseError::invalid_request("request line too small"));
    }

    if !buf[..MIN_REQUEST_LINE].iter().all(|b| (0x20..=0x7e).contains(b)) {
        error!("request line contains non-printable bytes");
        return Err(ParseError::invalid_request("request line not plain text"));
    }

    Ok(Sniff::Http1)
}

/// An `AsyncRead` that replays sniffed bytes before reading from the
/// underlying transport. The delegated HTTP/2 machinery wants to read the
/// preface itself.
pub(crate) struct Rewind<R> {
    prefix: BytesMut,
    inner: R,
}

impl<R> Rewind<R> {
    pub(crate) fn new(prefix: BytesMut, inner: R) -> Self {
        Self { prefix, inner }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Rewind<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = std::cmp::min(this.prefix.len(), buf.remaining());
            buf.put_slice(&this.prefix.split_to(n));
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_http1_request_line() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        });

        let mut buf = BytesMut::new();
        let result = sniff(&mut server, &mut buf).await.unwrap();
        assert_eq!(result, Sniff::Http1);
        assert!(buf.starts_with(b"GET /hello"));
    }

    #[tokio::test]
    async fn detects_http2_preface() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(HTTP2_PREFACE).await.unwrap();
        });

        let mut buf = BytesMut::new();
        assert_eq!(sniff(&mut server, &mut buf).await.unwrap(), Sniff::Http2);
    }

    #[tokio::test]
    async fn short_first_read_is_invalid() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(b"GET /\r\n").await.unwrap();
            client.shutdown().await.unwrap();
        });

        let mut buf = BytesMut::new();
        let err = sniff(&mut server, &mut buf).await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn binary_junk_is_invalid() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01, 0xfc, 0x03, 0x03, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]).await.unwrap();
        });

        let mut buf = BytesMut::new();
        let err = sniff(&mut server, &mut buf).await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn rewind_replays_prefix_first() {
        use tokio::io::AsyncReadExt;

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(b" world").await.unwrap();
            client.shutdown().await.unwrap();
        });

        let mut rewound = Rewind::new(BytesMut::from(&b"hello"[..]), server);
        let mut out = String::new();
        rewound.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }
}
