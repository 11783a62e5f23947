//! Delegated HTTP/2 serving.
//!
//! Connections that arrive with the HTTP/2 preface (or upgrade to h2c) are
//! handed to the `h2` crate; each accepted stream is dispatched into the
//! same [`Handler`] the HTTP/1 side uses. Streams are processed strictly
//! serially, matching the one-exchange-at-a-time model of the HTTP/1 loop.

use std::fmt::Display;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{ClientAddr, HttpError, ParseError, Secure, SendError};

pub(crate) async fn serve<T, H>(
    io: T,
    handler: &H,
    peer_addr: Option<SocketAddr>,
    secure: bool,
) -> Result<(), HttpError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
    H::RespBody: Body<Data = Bytes> + Unpin,
    <H::RespBody as Body>::Error: Display,
{
    let mut connection = h2::server::handshake(io)
        .await
        .map_err(|e| ParseError::invalid_protocol(format!("h2 handshake failed: {e}")))?;

    while let Some(accepted) = connection.accept().await {
        let (request, respond) =
            accepted.map_err(|e| ParseError::invalid_body(format!("h2 accept failed: {e}")))?;
        serve_stream(request, respond, handler, peer_addr, secure).await?;
    }

    debug!("h2 connection finished");
    Ok(())
}

async fn serve_stream<H>(
    request: Request<h2::RecvStream>,
    mut respond: h2::server::SendResponse<Bytes>,
    handler: &H,
    peer_addr: Option<SocketAddr>,
    secure: bool,
) -> Result<(), HttpError>
where
    H: Handler,
    H::RespBody: Body<Data = Bytes> + Unpin,
    <H::RespBody as Body>::Error: Display,
{
    let (mut parts, recv_stream) = request.into_parts();
    if let Some(addr) = peer_addr {
        parts.extensions.insert(ClientAddr(addr));
    }
    parts.extensions.insert(Secure(secure));
    let is_head = parts.method == Method::HEAD;

    let request = Request::from_parts(parts, ReqBody::h2(recv_stream));

    let response = match handler.call(request).await {
        Ok(response) => response,
        Err(e) => {
            error!("handler error on h2 stream: {}", e.into());
            let head = Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(()).unwrap();
            respond.send_response(head, true).map_err(h2_send_error)?;
            return Ok(());
        }
    };

    let (mut parts, mut body) = response.into_parts();
    // connection-level directives and headers have no meaning on a
    // multiplexed stream
    parts.extensions.clear();
    for name in [
        http::header::CONNECTION,
        http::header::TRANSFER_ENCODING,
        http::header::UPGRADE,
        http::header::HeaderName::from_static("keep-alive"),
        http::header::HeaderName::from_static("proxy-connection"),
    ] {
        parts.headers.remove(name);
    }

    let end_of_stream = is_head || body.is_end_stream();
    let head = Response::from_parts(parts, ());
    let mut send_stream = respond.send_response(head, end_of_stream).map_err(h2_send_error)?;
    if end_of_stream {
        return Ok(());
    }

    loop {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    send_data(&mut send_stream, data).await?;
                }
            }
            Some(Err(e)) => {
                error!("resolve response body error on h2 stream: {}", e);
                send_stream.send_reset(h2::Reason::INTERNAL_ERROR);
                return Ok(());
            }
            None => {
                send_stream.send_data(Bytes::new(), true).map_err(h2_send_error)?;
                return Ok(());
            }
        }
    }
}

/// Sends one chunk within the stream's flow-control window, waiting for
/// capacity as the peer opens it.
async fn send_data(send_stream: &mut h2::SendStream<Bytes>, mut data: Bytes) -> Result<(), HttpError> {
    while !data.is_empty() {
        send_stream.reserve_capacity(data.len());
        match futures::future::poll_fn(|cx| send_stream.poll_capacity(cx)).await {
            Some(Ok(capacity)) => {
                let chunk = data.split_to(capacity.min(data.len()));
                send_stream.send_data(chunk, false).map_err(h2_send_error)?;
            }
            Some(Err(e)) => return Err(h2_send_error(e).into()),
            None => return Err(SendError::invalid_body("h2 stream closed while sending").into()),
        }
    }
    Ok(())
}

fn h2_send_error(e: h2::Error) -> SendError {
    SendError::invalid_body(format!("h2 send failed: {e}"))
}
