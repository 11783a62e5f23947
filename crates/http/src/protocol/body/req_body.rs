use crate::protocol::body::body_channel::{body_channel, BodySender};
use crate::protocol::{Message, ParseError, PayloadSize, RequestHeader};
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};

use super::BodyReceiver;

/// The request body handed to a handler.
///
/// For HTTP/1 requests this is the receiver half of the demand-driven body
/// channel; for delegated HTTP/2 streams it wraps the stream's
/// `h2::RecvStream`, releasing flow-control capacity as chunks are
/// consumed.
pub struct ReqBody {
    inner: ReqBodyRepr,
}

enum ReqBodyRepr {
    Receiver(BodyReceiver),
    H2(h2::RecvStream),
    NoBody,
}

impl ReqBody {
    /// Creates the body for an HTTP/1 request, plus the connection-side
    /// sender that feeds it. Bodyless requests get no sender at all.
    pub(crate) fn h1_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (ReqBody, Option<BodySender<'_, S>>)
    where
        S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
    {
        match payload_size {
            PayloadSize::Empty | PayloadSize::Length(0) => (ReqBody::no_body(), None),
            _ => {
                let (sender, receiver) = body_channel(payload_stream, payload_size);
                (ReqBody { inner: ReqBodyRepr::Receiver(receiver) }, Some(sender))
            }
        }
    }

    /// Wraps the receive side of a delegated HTTP/2 stream.
    pub fn h2(recv_stream: h2::RecvStream) -> Self {
        Self { inner: ReqBodyRepr::H2(recv_stream) }
    }

    pub fn no_body() -> Self {
        Self { inner: ReqBodyRepr::NoBody }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match &mut this.inner {
            ReqBodyRepr::Receiver(body_receiver) => Pin::new(body_receiver).poll_frame(cx),
            ReqBodyRepr::H2(recv_stream) => match recv_stream.poll_data(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let _ = recv_stream.flow_control().release_capacity(bytes.len());
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Poll::Ready(Some(Err(e))) => {
                    Poll::Ready(Some(Err(ParseError::invalid_body(format!("h2 stream error: {e}")))))
                }
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            ReqBodyRepr::NoBody => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            ReqBodyRepr::NoBody => true,
            ReqBodyRepr::H2(recv_stream) => recv_stream.is_end_stream(),
            ReqBodyRepr::Receiver(_) => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            ReqBodyRepr::NoBody => SizeHint::with_exact(0),
            ReqBodyRepr::H2(_) => SizeHint::new(),
            ReqBodyRepr::Receiver(body_receiver) => body_receiver.size_hint(),
        }
    }
}
