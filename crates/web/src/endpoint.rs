//! Routed endpoint flavors.
//!
//! Four handler shapes mirror the ways a request can complete:
//! synchronously on the connection task, deferred on a spawned task that
//! drives the [`ResponseWriter`], with full context access, or streaming.
//! A streaming endpoint is fed parser events (head, body chunks,
//! completion, error) as they arrive instead of a buffered request.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;

use crate::context::{HttpContext, HttpRequest, HttpResponse};
use crate::status::Status;
use crate::writer::ResponseWriter;

/// What a streaming endpoint receives as the request unfolds.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    HeadersComplete,
    Body(Bytes),
    MessageComplete,
    /// The connection closed or the body failed before the message was
    /// complete; release whatever the exchange holds.
    Error,
}

/// Runs on the connection task with the buffered request; returns the
/// response status.
pub type SyncHandlerFn = dyn Fn(&HttpRequest, &mut HttpResponse) -> StatusCode + Send + Sync;

/// Runs on a spawned task and must drive the writer to `end` eventually.
#[async_trait]
pub trait DeferredHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest, writer: ResponseWriter);
}

/// Runs on the connection task with the whole context.
#[async_trait]
pub trait ContextHandler: Send + Sync {
    async fn handle(&self, ctx: &mut HttpContext) -> StatusCode;
}

/// Consumes request events directly; its status only matters at
/// [`RequestEvent::MessageComplete`].
#[async_trait]
pub trait StreamingHandler: Send + Sync {
    async fn on_event(&self, ctx: &mut HttpContext, event: RequestEvent) -> Status;
}

/// A routed request endpoint.
#[derive(Clone)]
pub enum Endpoint {
    Sync(Arc<SyncHandlerFn>),
    Deferred(Arc<dyn DeferredHandler>),
    Context(Arc<dyn ContextHandler>),
    Streaming(Arc<dyn StreamingHandler>),
}

impl Endpoint {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&HttpRequest, &mut HttpResponse) -> StatusCode + Send + Sync + 'static,
    {
        Endpoint::Sync(Arc::new(f))
    }

    pub fn deferred<H: DeferredHandler + 'static>(handler: H) -> Self {
        Endpoint::Deferred(Arc::new(handler))
    }

    pub fn context<H: ContextHandler + 'static>(handler: H) -> Self {
        Endpoint::Context(Arc::new(handler))
    }

    pub fn streaming<H: StreamingHandler + 'static>(handler: H) -> Self {
        Endpoint::Streaming(Arc::new(handler))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Endpoint::Streaming(_))
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flavor = match self {
            Endpoint::Sync(_) => "Sync",
            Endpoint::Deferred(_) => "Deferred",
            Endpoint::Context(_) => "Context",
            Endpoint::Streaming(_) => "Streaming",
        };
        f.debug_tuple("Endpoint").field(&flavor).finish()
    }
}
