//! Request/response views carried through the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use ferry_http::protocol::RequestHeader;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri, Version};

use crate::body::ResponseBody;
use crate::file_cache::FileCacheEntry;
use crate::service::HttpService;
use crate::writer::ResponseWriter;
use crate::Endpoint;

/// The request as the pipeline sees it: head, buffered body (empty for
/// streaming endpoints, which consume chunks as events), matched path
/// parameters, and connection facts.
pub struct HttpRequest {
    head: RequestHeader,
    pub body: Bytes,
    params: Vec<(String, String)>,
    client_addr: Option<SocketAddr>,
    scheme: &'static str,
}

impl HttpRequest {
    pub(crate) fn new(head: RequestHeader, body: Bytes, params: Vec<(String, String)>) -> Self {
        let client_addr = head.client_addr();
        let scheme = head.scheme();
        Self { head, body, params, client_addr, scheme }
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn path(&self) -> &str {
        self.head.uri().path()
    }

    pub fn query(&self) -> Option<&str> {
        self.head.uri().query()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    /// Header value as a string, when present and valid.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.head.headers().get(name.as_ref()).and_then(|value| value.to_str().ok())
    }

    /// A path parameter captured by the route match.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }
}

/// Rebuilds the head; extensions do not survive, but the connection facts
/// derived from them are carried in the struct fields.
impl Clone for HttpRequest {
    fn clone(&self) -> Self {
        let mut builder =
            Request::builder().method(self.head.method().clone()).uri(self.head.uri().clone()).version(self.head.version());
        *builder.headers_mut().unwrap() = self.head.headers().clone();
        Self {
            head: RequestHeader::from(builder.body(()).unwrap()),
            body: self.body.clone(),
            params: self.params.clone(),
            client_addr: self.client_addr,
            scheme: self.scheme,
        }
    }
}

/// The response under construction. Stages mutate it freely; the server
/// turns it into the wire response once the pipeline settles.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub(crate) cache_entry: Option<Arc<FileCacheEntry>>,
}

impl HttpResponse {
    pub(crate) fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: ResponseBody::empty(), cache_entry: None }
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn set_body(&mut self, body: impl Into<ResponseBody>) {
        self.body = body.into();
    }

    /// Sets a text/plain body.
    pub fn text(&mut self, text: impl Into<String>) {
        self.headers.insert(http::header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.as_ref().parse().unwrap());
        self.body = ResponseBody::from(text.into());
    }

    /// Sets a text/html body.
    pub fn html(&mut self, html: impl Into<String>) {
        self.headers.insert(http::header::CONTENT_TYPE, mime::TEXT_HTML.as_ref().parse().unwrap());
        self.body = ResponseBody::from(html.into());
    }
}

/// Everything a pipeline stage can reach: the service configuration, the
/// request, the response under construction, and the writer for stages
/// that complete asynchronously.
pub struct HttpContext {
    pub service: Arc<HttpService>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub writer: ResponseWriter,
    pub(crate) endpoint: Option<Endpoint>,
}
