//! The response writer used by deferred and streaming handlers.
//!
//! A handler that answers asynchronously stages status and headers on the
//! writer, publishes them with [`end_headers`](ResponseWriter::end_headers),
//! then pushes body chunks; the connection streams them out as they come.
//! The writer walks `Init → SendBegin → SendHeader → SendBody → SendEnd`,
//! or `Disconnected` on a hard close.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ferry_http::protocol::{HttpError, SendError};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    Init,
    SendBegin,
    SendHeader,
    SendBody,
    SendEnd,
    Disconnected,
}

/// Cloneable handle; all clones share one writer state.
#[derive(Clone)]
pub struct ResponseWriter {
    inner: Arc<Mutex<WriterInner>>,
}

struct WriterInner {
    state: WriterState,
    status: StatusCode,
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    body_tx: Option<mpsc::Sender<Result<Bytes, HttpError>>>,
}

/// Server-side receiving ends of a writer.
pub(crate) struct WriterHandle {
    pub(crate) head_rx: oneshot::Receiver<(StatusCode, HeaderMap)>,
    pub(crate) body_rx: mpsc::Receiver<Result<Bytes, HttpError>>,
}

impl ResponseWriter {
    pub(crate) fn channel() -> (Self, WriterHandle) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(8);
        let writer = Self {
            inner: Arc::new(Mutex::new(WriterInner {
                state: WriterState::Init,
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                head_tx: Some(head_tx),
                body_tx: Some(body_tx),
            })),
        };
        (writer, WriterHandle { head_rx, body_rx })
    }

    pub fn state(&self) -> WriterState {
        self.lock().state
    }

    /// True once the writer has started producing the response; the
    /// pipeline must not frame a response of its own then.
    pub fn begun(&self) -> bool {
        self.lock().state != WriterState::Init
    }

    pub fn set_status(&self, status: StatusCode) {
        let mut inner = self.lock();
        if inner.state <= WriterState::SendBegin {
            inner.status = status;
            inner.state = WriterState::SendBegin;
        } else {
            warn!("writer status set after headers were published, ignored");
        }
    }

    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        let mut inner = self.lock();
        if inner.state <= WriterState::SendBegin {
            inner.headers.insert(name, value);
            inner.state = WriterState::SendBegin;
        } else {
            warn!("writer header set after headers were published, ignored");
        }
    }

    /// Publishes status and headers to the connection. Body chunks may
    /// follow.
    pub fn end_headers(&self) -> Result<(), SendError> {
        let mut inner = self.lock();
        if inner.state >= WriterState::SendHeader {
            return Ok(());
        }
        let head_tx = inner.head_tx.take().ok_or_else(|| SendError::invalid_body("response head already sent"))?;
        let head = (inner.status, std::mem::take(&mut inner.headers));
        inner.state = WriterState::SendHeader;
        let result = head_tx.send(head).map_err(|_| SendError::invalid_body("connection is gone"));
        if result.is_ok() {
            inner.state = WriterState::SendBody;
        }
        result
    }

    /// Writes one body chunk, publishing the headers first if needed.
    pub async fn write_body(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        let sender = {
            let mut inner = self.lock();
            if inner.state == WriterState::Disconnected {
                return Err(SendError::invalid_body("writer disconnected"));
            }
            if inner.state < WriterState::SendBody {
                drop(inner);
                self.end_headers()?;
                inner = self.lock();
            }
            match &inner.body_tx {
                Some(sender) => sender.clone(),
                None => return Err(SendError::invalid_body("response already ended")),
            }
        };

        sender.send(Ok(data.into())).await.map_err(|_| SendError::invalid_body("connection is gone"))
    }

    /// Finishes the response. Publishes the headers when nothing was
    /// written yet, then closes the body stream.
    pub fn end(&self) -> Result<(), SendError> {
        self.end_headers()?;
        let mut inner = self.lock();
        inner.body_tx.take();
        if inner.state != WriterState::Disconnected {
            inner.state = WriterState::SendEnd;
        }
        Ok(())
    }

    /// Hard close: the connection sees the body stream fail and tears the
    /// transport down.
    pub fn close(&self, error: Option<HttpError>) {
        let mut inner = self.lock();
        inner.state = WriterState::Disconnected;
        inner.head_tx.take();
        if let (Some(sender), Some(error)) = (inner.body_tx.take(), error) {
            let _ = sender.try_send(Err(error));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_body_end_walks_states() {
        let (writer, mut handle) = ResponseWriter::channel();
        assert_eq!(writer.state(), WriterState::Init);
        assert!(!writer.begun());

        writer.set_status(StatusCode::ACCEPTED);
        assert!(writer.begun());

        writer.insert_header(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        writer.end_headers().unwrap();
        assert_eq!(writer.state(), WriterState::SendBody);

        let (status, headers) = handle.head_rx.await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(headers.get(http::header::CONTENT_TYPE).unwrap(), "text/plain");

        writer.write_body("chunk").await.unwrap();
        writer.end().unwrap();
        assert_eq!(writer.state(), WriterState::SendEnd);

        assert_eq!(handle.body_rx.recv().await.unwrap().unwrap(), Bytes::from_static(b"chunk"));
        assert!(handle.body_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn end_without_body_publishes_head() {
        let (writer, mut handle) = ResponseWriter::channel();
        writer.set_status(StatusCode::FORBIDDEN);
        writer.end().unwrap();

        let (status, _) = handle.head_rx.await.unwrap();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(handle.body_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_writer_cancels_head() {
        let (writer, handle) = ResponseWriter::channel();
        drop(writer);
        assert!(handle.head_rx.await.is_err());
    }
}
