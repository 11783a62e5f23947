//! Service layer for the ferry HTTP server.
//!
//! Builds on [`ferry_http`]'s per-connection core: an [`HttpService`]
//! bundles routing, the request-processing pipeline (preprocessor →
//! middleware → processor → postprocessor), static and large-file serving
//! through the shared [`FileCache`], forward/reverse proxying, WebSocket
//! endpoints, and the accept-loop [`Server`].

mod body;
mod context;
mod date;
mod endpoint;
mod file_body;
mod file_cache;
mod pages;
mod pipeline;
mod proxy;
pub mod router;
mod server;
mod service;
mod status;
mod static_files;
mod writer;

pub use body::ResponseBody;
pub use context::{HttpContext, HttpRequest, HttpResponse};
pub use endpoint::{ContextHandler, DeferredHandler, Endpoint, RequestEvent, StreamingHandler};
pub use file_cache::{CacheError, FileCache, FileCacheEntry, OpenParam};
pub use pipeline::{stage_fn, PipelineStage};
pub use server::{Server, ServerBuildError, ServerBuilder};
pub use service::{HttpService, HttpServiceBuilder, ProxyPass};
pub use status::Status;
pub use writer::{ResponseWriter, WriterState};

pub use ferry_http::websocket::{WebSocketChannel, WsEndpoint, WsMessage};
