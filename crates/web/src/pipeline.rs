//! The request-processing pipeline.
//!
//! `preprocessor → middleware… → processor → postprocessor`, each stage
//! returning a [`Status`]; anything but `Next` short-circuits to the
//! postprocessor. A final status ≥ 400 with an empty body (and a method
//! other than HEAD) gets an error page. When the writer has already begun
//! producing the response, the result is forced to `Next` so the caller
//! does not frame a response of its own.

use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode};
use tracing::warn;

use crate::context::HttpContext;
use crate::endpoint::{Endpoint, RequestEvent};
use crate::file_cache::OpenParam;
use crate::pages::make_status_page;
use crate::static_files;
use crate::status::Status;

/// A pluggable stage of the pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    async fn handle(&self, ctx: &mut HttpContext) -> Status;
}

struct StageFn<F>(F);

#[async_trait]
impl<F> PipelineStage for StageFn<F>
where
    F: Fn(&mut HttpContext) -> Status + Send + Sync,
{
    async fn handle(&self, ctx: &mut HttpContext) -> Status {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a [`PipelineStage`].
pub fn stage_fn<F>(f: F) -> impl PipelineStage
where
    F: Fn(&mut HttpContext) -> Status + Send + Sync,
{
    StageFn(f)
}

/// Runs the whole pipeline for one request.
pub(crate) async fn handle_http_request(ctx: &mut HttpContext) -> Status {
    let service = ctx.service.clone();

    // a status set before the pipeline runs (proxy forbidden, parse
    // trouble) goes straight to the postprocessor
    let mut status =
        if ctx.response.status == StatusCode::OK { Status::Next } else { Status::Code(ctx.response.status) };

    if status.is_next() {
        if let Some(preprocessor) = &service.preprocessor {
            status = preprocessor.handle(ctx).await;
        }
    }

    if status.is_next() {
        for middleware in &service.middleware {
            status = middleware.handle(ctx).await;
            if !status.is_next() {
                break;
            }
        }
    }

    if status.is_next() {
        status = match &service.processor {
            Some(processor) => processor.handle(ctx).await,
            None => default_request_handler(ctx).await,
        };
    }

    // postprocessing
    if let Status::Code(code) = status {
        ctx.response.status = code;
        if code.as_u16() >= 400 && ctx.response.body.is_unset() && ctx.request.method() != Method::HEAD {
            match &service.error_handler {
                Some(error_handler) => {
                    error_handler.handle(ctx).await;
                }
                None => default_error_handler(ctx).await,
            }
        }
    }

    bind_cache_entry(ctx);

    if let Some(postprocessor) = &service.postprocessor {
        postprocessor.handle(ctx).await;
    }

    if ctx.writer.begun() {
        return Status::Next;
    }
    status
}

/// Routed endpoint, else static files for GET/HEAD, else 501.
async fn default_request_handler(ctx: &mut HttpContext) -> Status {
    let endpoint = ctx.endpoint.clone();
    let service = ctx.service.clone();

    match endpoint {
        Some(Endpoint::Sync(handler)) => Status::Code(handler(&ctx.request, &mut ctx.response)),

        Some(Endpoint::Context(handler)) => Status::Code(handler.handle(ctx).await),

        Some(Endpoint::Deferred(handler)) => {
            let request = ctx.request.clone();
            let writer = ctx.writer.clone();
            tokio::spawn(async move {
                handler.handle(request, writer).await;
            });
            Status::Next
        }

        Some(Endpoint::Streaming(handler)) => handler.on_event(ctx, RequestEvent::MessageComplete).await,

        None => {
            if matches!(ctx.request.method(), &Method::GET | &Method::HEAD) {
                if let Some(static_handler) = &service.static_handler {
                    static_handler.handle(ctx).await
                } else if service.document_root.is_some() {
                    static_files::serve_static(ctx).await
                } else {
                    Status::Code(StatusCode::NOT_FOUND)
                }
            } else {
                Status::Code(StatusCode::NOT_IMPLEMENTED)
            }
        }
    }
}

/// Configured error page through the cache, else a generated status page.
async fn default_error_handler(ctx: &mut HttpContext) {
    let service = ctx.service.clone();

    if let (Some(error_page), Some(document_root)) = (&service.error_page, &service.document_root) {
        let path = document_root.join(error_page);
        let param = OpenParam { max_read: service.max_file_cache_size, need_read: true };
        match service.file_cache.open(&path, &param).await {
            Ok(entry) => {
                ctx.response.cache_entry = Some(entry);
                return;
            }
            Err(e) => warn!(page = %path.display(), "error page unavailable: {}", e),
        }
    }

    if ctx.response.body.is_unset() {
        let page = make_status_page(ctx.response.status);
        ctx.response.html(page);
    }
}

/// Copies a bound cache entry into the response: validators and content
/// type as headers, the content as the body. HEAD responses advertise the
/// entity without carrying it.
fn bind_cache_entry(ctx: &mut HttpContext) {
    let entry = match &ctx.response.cache_entry {
        Some(entry) => entry.clone(),
        None => return,
    };

    let headers = &mut ctx.response.headers;
    if let Ok(value) = HeaderValue::try_from(entry.content_type.as_str()) {
        headers.insert(http::header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::try_from(entry.last_modified.as_str()) {
        headers.insert(http::header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::try_from(entry.etag.as_str()) {
        headers.insert(http::header::ETAG, value);
    }

    if ctx.request.method() == &Method::HEAD {
        headers.insert(http::header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(entry.size));
    } else {
        ctx.response.body = crate::body::ResponseBody::once(entry.content.clone());
    }
}
