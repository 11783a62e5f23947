//! The per-connection driver.
//!
//! One [`HttpConnection`] owns one accepted transport. It sniffs the
//! protocol, then runs the HTTP/1 exchange loop: decode a request head,
//! run the handler while the body streams in on demand, frame the
//! response out, and reset for the next request while the connection stays
//! keep-alive. A [`Takeover`] attached to a response ends the loop and
//! hands the transport to the WebSocket session, the delegated HTTP/2
//! machinery, or a raw proxy tunnel.

use std::fmt::Display;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use http::{header, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::connection::h2_connection;
use crate::connection::sniff::{sniff, Rewind, Sniff};
use crate::connection::takeover::{Takeover, TakeoverKind};
use crate::connection::tunnel::{self, TunnelTimeouts};
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{
    ClientAddr, HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, Secure,
    SendError,
};
use crate::websocket;

use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, info, trace};

const HTTP_100_CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Bodies up to this size ship together with the header in one write;
/// larger ones ship the header first and stream afterwards.
const COALESCE_LIMIT: u64 = 1 << 20;

/// Drives a single accepted connection.
pub struct HttpConnection<R, W> {
    reader: R,
    writer: W,
    peer_addr: Option<SocketAddr>,
    secure: bool,
}

enum Flow {
    Continue,
    Close,
    Takeover(TakeoverKind),
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer, peer_addr: None, secure: false }
    }

    /// Records the peer address, surfaced to handlers via [`ClientAddr`].
    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Marks the transport as TLS-wrapped; handlers observe the `https`
    /// scheme.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Runs the connection to completion.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let mut sniff_buf = BytesMut::with_capacity(8 * 1024);
        match sniff(&mut self.reader, &mut sniff_buf).await {
            Ok(Sniff::Http1) => {}
            Ok(Sniff::Http2) => {
                trace!("http/2 preface detected");
                let io = tokio::io::join(Rewind::new(sniff_buf, self.reader), self.writer);
                return h2_connection::serve(io, handler.as_ref(), self.peer_addr, self.secure).await;
            }
            Err(e) => {
                error!(peer = ?self.peer_addr, "{}", e);
                return Err(e.into());
            }
        }

        let mut framed_read = FramedRead::with_capacity(self.reader, RequestDecoder::new(), 8 * 1024);
        framed_read.read_buffer_mut().unsplit(sniff_buf);
        let mut framed_write = FramedWrite::new(self.writer, ResponseEncoder::new());

        let takeover = loop {
            match framed_read.next().await {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    let flow = do_process(
                        &mut framed_read,
                        &mut framed_write,
                        header,
                        payload_size,
                        &handler,
                        self.peer_addr,
                        self.secure,
                    )
                    .await?;
                    match flow {
                        Flow::Continue => continue,
                        Flow::Close => return Ok(()),
                        Flow::Takeover(kind) => break kind,
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("payload item arrived while waiting for a request head");
                    let error_response = build_error_response(StatusCode::BAD_REQUEST);
                    do_send_response(&mut framed_write, error_response, false).await?;
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    error!("can't receive next request, cause {}", e);
                    let error_response = build_error_response(StatusCode::BAD_REQUEST);
                    do_send_response(&mut framed_write, error_response, false).await?;
                    return Err(e.into());
                }

                None => {
                    info!("no more requests, connection shutdown");
                    return Ok(());
                }
            }
        };

        // the exchange loop is over; whatever already arrived for the next
        // protocol is replayed into it
        let leftover = framed_read.read_buffer_mut().split();
        let reader = framed_read.into_inner();
        let writer = framed_write.into_inner();

        match takeover {
            TakeoverKind::WebSocket { endpoint, ping_interval } => {
                info!(peer = ?self.peer_addr, "switched to websocket");
                let io = tokio::io::join(reader, writer);
                websocket::session(io, leftover, endpoint, ping_interval).await;
                Ok(())
            }
            TakeoverKind::Http2 => {
                info!(peer = ?self.peer_addr, "switched to http/2");
                let io = tokio::io::join(Rewind::new(leftover, reader), writer);
                h2_connection::serve(io, handler.as_ref(), self.peer_addr, self.secure).await
            }
            TakeoverKind::Tunnel { mut upstream, head, read_timeout, write_timeout } => {
                upstream.write_all(&head).await.map_err(SendError::io)?;
                if !leftover.is_empty() {
                    upstream.write_all(&leftover).await.map_err(SendError::io)?;
                }
                tunnel::run(reader, writer, upstream, TunnelTimeouts { read: read_timeout, write: write_timeout })
                    .await;
                Ok(())
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn do_process<R, W, H>(
    framed_read: &mut FramedRead<R, RequestDecoder>,
    framed_write: &mut FramedWrite<W, ResponseEncoder>,
    mut header: RequestHeader,
    payload_size: PayloadSize,
    handler: &Arc<H>,
    peer_addr: Option<SocketAddr>,
    secure: bool,
) -> Result<Flow, HttpError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    H: Handler,
    H::RespBody: Body<Data = Bytes> + Unpin,
    <H::RespBody as Body>::Error: Display,
{
    // interim response comes before the handler ever runs
    if header.expect_continue() {
        let writer = framed_write.get_mut();
        writer.write_all(HTTP_100_CONTINUE).await.map_err(SendError::io)?;
        writer.flush().await.map_err(SendError::io)?;
        info!("expect header honored, sent 100 continue");
    }

    if let Some(addr) = peer_addr {
        header.as_mut().extensions_mut().insert(ClientAddr(addr));
    }
    header.as_mut().extensions_mut().insert(Secure(secure));

    let is_head = header.method() == &http::Method::HEAD;
    let request_keep_alive = header.is_keep_alive();

    let (req_body, body_sender) = ReqBody::h1_channel(framed_read, payload_size);
    let request = header.body(req_body);

    // the handler runs concurrently with the demand-driven body sender:
    // the handler may await body chunks that only the sender can produce
    let (response_result, mut body_sender) = match body_sender {
        Some(mut sender) => {
            let result = {
                tokio::pin! {
                    let handler_future = handler.call(request);
                    let sender_future = sender.run();
                }

                // the sender future may finish first (payload fully
                // consumed); it must not be polled again after that
                let mut sender_done = false;
                loop {
                    select! {
                        biased;
                        response = &mut handler_future => break response,
                        _ = &mut sender_future, if !sender_done => {
                            sender_done = true;
                        }
                    }
                }
            };
            (result, Some(sender))
        }
        None => (handler.call(request).await, None),
    };

    let response = match response_result {
        Ok(response) => response,
        Err(e) => {
            error!("handler error, cause: {}", e.into());
            if let Some(sender) = body_sender.as_mut() {
                sender.skip().await?;
            }
            do_send_response(framed_write, build_error_response(StatusCode::INTERNAL_SERVER_ERROR), is_head)
                .await?;
            return Ok(if request_keep_alive { Flow::Continue } else { Flow::Close });
        }
    };

    let takeover = match response.extensions().get::<Takeover>().and_then(Takeover::take) {
        // a tunnel forwards the raw request bytes; nothing may consume
        // them here and no response goes downstream
        Some(kind @ TakeoverKind::Tunnel { .. }) => return Ok(Flow::Takeover(kind)),
        takeover => takeover,
    };

    if let Some(sender) = body_sender.as_mut() {
        sender.skip().await?;
    }

    let response_close = response
        .headers()
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false);

    do_send_response(framed_write, response, is_head).await?;

    if let Some(kind) = takeover {
        return Ok(Flow::Takeover(kind));
    }

    if request_keep_alive && !response_close {
        Ok(Flow::Continue)
    } else {
        Ok(Flow::Close)
    }
}

async fn do_send_response<W, T>(
    framed_write: &mut FramedWrite<W, ResponseEncoder>,
    response: Response<T>,
    is_head: bool,
) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin,
    T: Body<Data = Bytes> + Unpin,
    T::Error: Display,
{
    let (header_parts, mut body) = response.into_parts();

    // HEAD responses describe the entity without carrying it
    let payload_size = if is_head { PayloadSize::Empty } else { PayloadSize::from(body.size_hint()) };

    // small fixed-size bodies coalesce with the header into a single
    // write; everything else flushes the header first and streams
    let coalesce = match payload_size {
        PayloadSize::Length(n) => n <= COALESCE_LIMIT,
        PayloadSize::Empty => true,
        PayloadSize::Chunked => false,
    };

    let head = Message::<_, Bytes>::Header((ResponseHead::from_parts(header_parts, ()), payload_size));
    if coalesce {
        framed_write.feed(head).await?;
    } else {
        framed_write.send(head).await?;
    }

    if !is_head {
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    let payload_item = frame
                        .into_data()
                        .map(PayloadItem::Chunk)
                        .map_err(|_e| SendError::invalid_body("resolve body response error"))?;

                    let item = Message::<(ResponseHead, PayloadSize), _>::Payload(payload_item);
                    if coalesce {
                        framed_write.feed(item).await?;
                    } else {
                        // each chunk hits the wire on its own so paced
                        // bodies keep their cadence
                        framed_write.send(item).await?;
                    }
                }
                Some(Err(e)) => {
                    return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into())
                }
                None => break,
            }
        }
    }

    framed_write.send(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof)).await?;
    Ok(())
}

fn build_error_response(status_code: StatusCode) -> Response<Empty<Bytes>> {
    Response::builder().status(status_code).body(Empty::<Bytes>::new()).unwrap()
}
