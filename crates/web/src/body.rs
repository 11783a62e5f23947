use bytes::Bytes;
use ferry_http::protocol::HttpError;
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::BoxBody;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::file_body::FileBody;

/// The response body handed back to the connection core.
///
/// Concrete kinds cover the ways this crate produces bodies: a single
/// buffer (routed handlers, cached files, generated pages), a paced
/// large-file read, a channel fed by a [`ResponseWriter`], or an arbitrary
/// boxed stream.
///
/// [`ResponseWriter`]: crate::ResponseWriter
pub struct ResponseBody {
    kind: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    File(FileBody),
    Channel(ChannelBody),
    Boxed(BoxBody<Bytes, HttpError>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { kind: Kind::Once(None) }
    }

    pub fn once(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self { kind: Kind::Once(Some(bytes)) }
        }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = HttpError> + Send + Sync + 'static,
    {
        Self { kind: Kind::Boxed(BoxBody::new(body)) }
    }

    pub(crate) fn file(file_body: FileBody) -> Self {
        Self { kind: Kind::File(file_body) }
    }

    pub(crate) fn channel(receiver: mpsc::Receiver<Result<Bytes, HttpError>>) -> Self {
        Self { kind: Kind::Channel(ChannelBody { receiver }) }
    }

    /// True while no handler has produced any body content.
    pub fn is_unset(&self) -> bool {
        matches!(&self.kind, Kind::Once(None))
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(value)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(value.as_bytes())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        Self::once(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::once(value)
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().kind {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::File(file_body) => Pin::new(file_body).poll_frame(cx),
            Kind::Channel(channel_body) => Pin::new(channel_body).poll_frame(cx),
            Kind::Boxed(box_body) => Pin::new(box_body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::File(file_body) => file_body.is_end_stream(),
            Kind::Channel(_) => false,
            Kind::Boxed(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::File(file_body) => file_body.size_hint(),
            Kind::Channel(_) => SizeHint::new(),
            Kind::Boxed(box_body) => box_body.size_hint(),
        }
    }
}

/// Body streamed out of a [`ResponseWriter`](crate::ResponseWriter): the
/// connection pulls whatever the writer's owner pushes.
struct ChannelBody {
    receiver: mpsc::Receiver<Result<Bytes, HttpError>>,
}

impl HttpBody for ChannelBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut().receiver.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
