//! Demand-driven body channel between the connection's framed stream and
//! the request body handed to a handler.
//!
//! The receiver half lives inside [`super::ReqBody`]; the sender half stays
//! on the connection task and only pulls payload frames off the wire when
//! the receiver asks for the next chunk. A handler that never reads its
//! body therefore never forces the connection to buffer it; the connection
//! drains the remainder itself (`skip`) before the next request.

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::Bytes;
use futures::{channel::mpsc, Sink, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::error;

pub(crate) fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (BodySender<'_, S>, BodyReceiver)
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    let (signal_sender, signal_receiver) = mpsc::channel(8);
    let (data_sender, data_receiver) = mpsc::channel(8);

    (
        BodySender { payload_stream, signal_receiver, data_sender, eof: false },
        BodyReceiver { signal_sender, data_receiver, payload_size, in_flight: false },
    )
}

pub(crate) enum BodySignal {
    RequestData,
}

/// Connection-side half: pulls payload frames off the framed stream on
/// demand and pushes them to the receiver.
pub(crate) struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<BodySignal>,
    data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    eof: bool,
}

impl<'conn, S> BodySender<'conn, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Serves chunk requests until the payload is exhausted or the receiver
    /// goes away. Runs concurrently with the request handler.
    pub(crate) async fn run(&mut self) -> Result<(), ParseError> {
        if self.eof {
            return Ok(());
        }

        while let Some(BodySignal::RequestData) = self.signal_receiver.next().await {
            match self.next_payload().await {
                Ok(payload_item) => {
                    self.eof = payload_item.is_eof();
                    if let Err(e) = self.data_sender.send(Ok(payload_item)).await {
                        error!("failed to push payload chunk to body receiver: {}", e);
                        return Err(ParseError::invalid_body("body receiver hung up"));
                    }
                    if self.eof {
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!("failed to read payload from connection: {}", e);
                    let _ = self.data_sender.send(Err(e)).await;
                    return Err(ParseError::invalid_body("payload stream error"));
                }
            }
        }

        Ok(())
    }

    /// Drains whatever part of the payload the handler left unread, so the
    /// decoder is positioned at the next request head.
    pub(crate) async fn skip(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            let payload_item = self.next_payload().await?;
            self.eof = payload_item.is_eof();
        }
        Ok(())
    }

    async fn next_payload(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("received a message head while a payload was pending");
                Err(ParseError::invalid_body("unexpected message head inside payload"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed inside payload")),
        }
    }
}

/// Handler-side half: an `http_body::Body` that requests one chunk at a
/// time from the sender.
#[derive(Debug)]
pub(crate) struct BodyReceiver {
    signal_sender: mpsc::Sender<BodySignal>,
    data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    in_flight: bool,
}

impl Body for BodyReceiver {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(e) = Pin::new(&mut this.signal_sender).start_send(BodySignal::RequestData) {
                        error!("failed to signal body sender: {}", e);
                        return Poll::Ready(Some(Err(ParseError::invalid_body("body sender hung up"))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(e)) => {
                    error!("failed to reach body sender: {}", e);
                    return Poll::Ready(Some(Err(ParseError::invalid_body("body sender hung up"))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.in_flight = false;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.in_flight = false;
                Poll::Ready(Some(Err(ParseError::invalid_body("body channel closed mid-payload"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::task::noop_waker_ref;
    use futures::FutureExt;
    use std::task::Context;

    #[tokio::test]
    async fn receiver_requests_one_chunk_at_a_time() {
        let (signal_sender, mut signal_receiver) = mpsc::channel(8);
        let (mut data_sender, data_receiver) = mpsc::channel(8);
        let mut receiver =
            BodyReceiver { signal_sender, data_receiver, payload_size: PayloadSize::Chunked, in_flight: false };

        let mut cx = Context::from_waker(noop_waker_ref());

        assert!(matches!(Pin::new(&mut receiver).poll_frame(&mut cx), Poll::Pending));
        assert!(matches!(signal_receiver.next().await, Some(BodySignal::RequestData)));

        // no second signal until the first chunk arrived
        assert!(matches!(Pin::new(&mut receiver).poll_frame(&mut cx), Poll::Pending));
        assert!(signal_receiver.next().now_or_never().is_none());

        data_sender.try_send(Ok(PayloadItem::Chunk(Bytes::from_static(b"hello")))).expect("send chunk");

        match Pin::new(&mut receiver).poll_frame(&mut cx) {
            Poll::Ready(Some(Ok(frame))) => {
                assert_eq!(frame.into_data().expect("data frame"), Bytes::from_static(b"hello"));
            }
            other => panic!("unexpected poll result: {:?}", other),
        }

        assert!(matches!(Pin::new(&mut receiver).poll_frame(&mut cx), Poll::Pending));
        assert!(matches!(signal_receiver.next().await, Some(BodySignal::RequestData)));

        data_sender.try_send(Ok(PayloadItem::Eof)).expect("send eof");
        assert!(matches!(Pin::new(&mut receiver).poll_frame(&mut cx), Poll::Ready(None)));
    }
}
