//! The accept-loop server and the request orchestration.
//!
//! `Server` implements the connection core's [`Handler`]: each request is
//! taken through proxy engagement, upgrade handling, routing, the
//! pipeline, and writer continuation, ending in a wire response (possibly
//! carrying a take-over directive for the connection to execute).

use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use ferry_http::connection::{HttpConnection, Takeover};
use ferry_http::handler::Handler;
use ferry_http::protocol::body::ReqBody;
use ferry_http::protocol::RequestHeader;
use ferry_http::websocket::{accept_key, select_subprotocol};
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::body::ResponseBody;
use crate::context::{HttpContext, HttpRequest, HttpResponse};
use crate::date::DateService;
use crate::endpoint::{Endpoint, RequestEvent};
use crate::file_cache::ReleaseOnSent;
use crate::pipeline;
use crate::proxy::{self, ProxyTarget};
use crate::service::HttpService;
use crate::writer::ResponseWriter;

const SERVER_TOKEN: &str = concat!("ferry/", env!("CARGO_PKG_VERSION"));

pub struct Server {
    service: Arc<HttpService>,
    address: Vec<SocketAddr>,
}

pub struct ServerBuilder {
    service: Option<Arc<HttpService>>,
    address: Option<Vec<SocketAddr>>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("service must be set")]
    MissingService,
    #[error("address must be set")]
    MissingAddress,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { service: None, address: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().expect("invalid listen address").collect::<Vec<_>>());
        self
    }

    pub fn service(mut self, service: Arc<HttpService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let service = self.service.ok_or(ServerBuildError::MissingService)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        Ok(Server { service, address })
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn service(&self) -> &Arc<HttpService> {
        &self.service
    }

    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            warn!("tracing subscriber was already installed");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        let handler = Arc::new(self);
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let handler = handler.clone();

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer).peer_addr(remote_addr);
                match connection.process(handler).await {
                    Ok(_) => info!(peer = %remote_addr, "connection shutdown"),
                    Err(e) => error!(peer = %remote_addr, "connection error: {}", e),
                }
            });
        }
    }
}

impl Handler for Server {
    type RespBody = ResponseBody;
    type Error = Infallible;
    type Fut<'fut> = Pin<Box<dyn Future<Output = Result<Response<Self::RespBody>, Self::Error>> + Send + 'fut>>;

    fn call(&self, req: Request<ReqBody>) -> Self::Fut<'_> {
        Box::pin(async { Ok(dispatch(self.service.clone(), req).await) })
    }
}

/// Takes one request through the whole service: proxies, upgrades,
/// routing, the pipeline, writer continuation.
async fn dispatch(service: Arc<HttpService>, req: Request<ReqBody>) -> Response<ResponseBody> {
    let (parts, body) = req.into_parts();
    let header = RequestHeader::from(parts);

    let method = header.method().clone();
    let is_head = method == Method::HEAD;
    let path = header.uri().path().to_string();
    let client_addr = header.client_addr();

    let mut keep_alive = header.is_keep_alive();

    // absolute-form targets engage the forward proxy (HTTP/2 requests
    // always carry authority and scheme; they are not proxy requests)
    let forward_proxy = header.version() < Version::HTTP_2 && header.is_absolute_form();
    if forward_proxy {
        keep_alive = proxy::proxy_keep_alive(&header, keep_alive);
        if service.enable_forward_proxy {
            // tunnels bypass the pipeline and the access log entirely
            return proxy_connect(&service, &header, None, keep_alive).await;
        }
        warn!(url = %header.uri(), "forbidden to forward proxy");
    } else if let Some(rewritten) = proxy::reverse_proxy_url(&service, &path) {
        return proxy_connect(&service, &header, Some(rewritten), keep_alive).await;
    }

    let mut response = HttpResponse::new();
    response.headers.insert(header::SERVER, HeaderValue::from_static(SERVER_TOKEN));
    response.headers.insert(
        header::CONNECTION,
        HeaderValue::from_static(if keep_alive { "keep-alive" } else { "close" }),
    );

    if forward_proxy {
        // not allowed; the pipeline turns this into an error-page response
        response.status = StatusCode::FORBIDDEN;
    } else if let Some(token) = header.upgrade_token() {
        let token = token.to_string();
        let response = handle_upgrade(&service, &header, &token, response);
        return finish(&service, client_addr, &method, &path, response);
    }

    let (endpoint, params) = service.router.resolve(&path, &header);
    let (writer, mut handle) = ResponseWriter::channel();

    let streaming = matches!(&endpoint, Some(endpoint) if endpoint.is_streaming());

    let mut ctx = if streaming {
        // streaming endpoints see the body as events, not as a buffer
        let request = HttpRequest::new(header, Bytes::new(), params);
        let mut ctx =
            HttpContext { service: service.clone(), request, response, writer: writer.clone(), endpoint };

        let handler = match ctx.endpoint.clone() {
            Some(Endpoint::Streaming(handler)) => handler,
            _ => unreachable!("streaming flag implies a streaming endpoint"),
        };

        handler.on_event(&mut ctx, RequestEvent::HeadersComplete).await;

        let mut body = body;
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        handler.on_event(&mut ctx, RequestEvent::Body(data)).await;
                    }
                }
                Some(Err(e)) => {
                    warn!("request body failed mid-stream: {}", e);
                    handler.on_event(&mut ctx, RequestEvent::Error).await;
                    let response = status_response(StatusCode::BAD_REQUEST);
                    return finish(&service, client_addr, &method, &path, response);
                }
                None => break,
            }
        }
        ctx
    } else {
        let collected = match BodyExt::collect(body).await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("failed to read request body: {}", e);
                let response = status_response(StatusCode::BAD_REQUEST);
                return finish(&service, client_addr, &method, &path, response);
            }
        };
        let request = HttpRequest::new(header, collected, params);
        HttpContext { service: service.clone(), request, response, writer: writer.clone(), endpoint }
    };

    let status = pipeline::handle_http_request(&mut ctx).await;

    let response = if status.is_next() {
        // an external continuation owns the writer; its head arrives when
        // the handler publishes it
        drop(ctx);
        match (&mut handle.head_rx).await {
            Ok((status_code, mut headers)) => {
                if !headers.contains_key(header::SERVER) {
                    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_TOKEN));
                }
                if !headers.contains_key(header::CONNECTION) {
                    headers.insert(
                        header::CONNECTION,
                        HeaderValue::from_static(if keep_alive { "keep-alive" } else { "close" }),
                    );
                }
                let mut builder = Response::builder().status(status_code);
                *builder.headers_mut().expect("fresh builder") = headers;
                builder.body(ResponseBody::channel(handle.body_rx)).expect("valid response")
            }
            Err(_) => {
                error!("writer dropped without publishing a response head");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    } else {
        into_response(ctx, is_head)
    };

    finish(&service, client_addr, &method, &path, response)
}

/// `Upgrade:` dispatch: WebSocket handshake, h2c switch, or a rejected
/// token.
fn handle_upgrade(
    service: &Arc<HttpService>,
    header: &RequestHeader,
    token: &str,
    composed: HttpResponse,
) -> Response<ResponseBody> {
    info!(peer = ?header.client_addr(), upgrade = token, "upgrade requested");

    if token.eq_ignore_ascii_case("websocket") {
        let endpoint = match &service.ws_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                error!("websocket upgrade requested but no endpoint is configured");
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        let mut builder = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::SERVER, composed.headers.get(header::SERVER).cloned().unwrap_or(HeaderValue::from_static(SERVER_TOKEN)))
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket");

        if let Some(key) = header.headers().get("sec-websocket-key").and_then(|value| value.to_str().ok()) {
            builder = builder.header("sec-websocket-accept", accept_key(key));
        }
        if let Some(offered) = header.headers().get("sec-websocket-protocol").and_then(|value| value.to_str().ok()) {
            if let Some(subprotocol) = select_subprotocol(offered) {
                warn!(offered, selected = subprotocol, "selecting first websocket subprotocol");
                builder = builder.header("sec-websocket-protocol", subprotocol.to_string());
            }
        }

        let mut response = builder.body(ResponseBody::empty()).expect("valid upgrade response");
        response.extensions_mut().insert(Takeover::websocket(endpoint, service.ping_interval));
        return response;
    }

    if token.len() >= 2 && token[..2].eq_ignore_ascii_case("h2") {
        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "h2c")
            .body(ResponseBody::empty())
            .expect("valid upgrade response");
        response.extensions_mut().insert(Takeover::http2());
        return response;
    }

    error!(upgrade = token, "unsupported upgrade token");
    status_response(StatusCode::BAD_REQUEST)
}

/// Opens the upstream and wraps it in a tunnel take-over, or produces the
/// gateway error status.
async fn proxy_connect(
    service: &Arc<HttpService>,
    header: &RequestHeader,
    rewritten: Option<String>,
    keep_alive: bool,
) -> Response<ResponseBody> {
    let target = match rewritten {
        Some(url) => url.parse::<Uri>().ok().and_then(|uri| ProxyTarget::from_uri(&uri)),
        None => ProxyTarget::from_uri(header.uri()),
    };
    let target = match target {
        Some(target) => target,
        None => {
            error!("proxy target is not a valid url");
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    match proxy::connect_upstream(service, &target).await {
        Ok(upstream) => {
            let head = proxy::serialize_head(
                header,
                &target.path_and_query,
                keep_alive,
                header.client_addr().map(|addr| addr.ip()),
            );
            let mut response = Response::builder().body(ResponseBody::empty()).expect("valid response");
            response.extensions_mut().insert(Takeover::tunnel(
                upstream,
                head,
                service.proxy_read_timeout,
                service.proxy_write_timeout,
            ));
            response
        }
        Err(status) => status_response(status),
    }
}

/// Converts the finished context into the wire response.
fn into_response(ctx: HttpContext, is_head: bool) -> Response<ResponseBody> {
    let service = ctx.service;
    let mut staged = ctx.response;

    if is_head && staged.cache_entry.is_none() {
        staged.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        staged.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0));
        staged.body = ResponseBody::empty();
    }

    let mut builder = Response::builder().status(staged.status);
    *builder.headers_mut().expect("fresh builder") = staged.headers;
    let mut response = builder.body(staged.body).expect("valid response");

    if let Some(entry) = staged.cache_entry {
        if entry.size > service.cache_release_threshold {
            response.extensions_mut().insert(Arc::new(ReleaseOnSent { cache: service.file_cache.clone(), entry }));
        }
    }

    response
}

/// A bare status response that also closes the connection.
fn status_response(status: StatusCode) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(header::SERVER, HeaderValue::from_static(SERVER_TOKEN))
        .header(header::CONNECTION, "close")
        .body(ResponseBody::empty())
        .expect("valid response")
}

/// Last stop for every non-tunnel response: `Date` header and the access
/// log.
fn finish(
    service: &HttpService,
    client_addr: Option<SocketAddr>,
    method: &Method,
    path: &str,
    mut response: Response<ResponseBody>,
) -> Response<ResponseBody> {
    static DATE: OnceLock<DateService> = OnceLock::new();
    let date = DATE.get_or_init(DateService::new);
    if !response.headers().contains_key(header::DATE) {
        response.headers_mut().insert(header::DATE, date.http_date());
    }

    if service.enable_access_log {
        match client_addr {
            Some(addr) => info!(target: "access", "[{}] \"{} {}\" => {}", addr, method, path, response.status().as_u16()),
            None => info!(target: "access", "\"{} {}\" => {}", method, path, response.status().as_u16()),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::router::{get, Router};
    use crate::writer::ResponseWriter;
    use async_trait::async_trait;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn hello(_req: &HttpRequest, resp: &mut HttpResponse) -> StatusCode {
        resp.set_body("hi");
        StatusCode::OK
    }

    struct SlowEcho;

    #[async_trait]
    impl crate::endpoint::DeferredHandler for SlowEcho {
        async fn handle(&self, request: HttpRequest, writer: ResponseWriter) {
            writer.set_status(StatusCode::OK);
            writer.end_headers().unwrap();
            writer.write_body(request.body.clone()).await.unwrap();
            writer.end().unwrap();
        }
    }

    struct NoopWs;

    #[async_trait]
    impl ferry_http::websocket::WsEndpoint for NoopWs {}

    fn spawn_server(service: Arc<HttpService>) -> DuplexStream {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let handler = Arc::new(Server { service, address: vec![] });
        tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            let peer = "10.0.0.7:54321".parse().unwrap();
            let _ = HttpConnection::new(reader, writer).peer_addr(peer).process(handler).await;
        });
        client
    }

    async fn read_response(client: &mut DuplexStream) -> (String, Vec<u8>) {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.expect("read head");
            raw.push(byte[0]);
        }
        let head = String::from_utf8(raw).unwrap();
        let lower = head.to_ascii_lowercase();

        let mut body = Vec::new();
        if let Some(length) =
            lower.lines().find_map(|line| line.strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap()))
        {
            body.resize(length, 0);
            if length > 0 {
                client.read_exact(&mut body).await.expect("read body");
            }
        } else if lower.contains("transfer-encoding: chunked") {
            // dechunk until the zero-size chunk
            loop {
                let mut line = Vec::new();
                loop {
                    client.read_exact(&mut byte).await.unwrap();
                    line.push(byte[0]);
                    if line.ends_with(b"\r\n") {
                        break;
                    }
                }
                let size_text = String::from_utf8(line[..line.len() - 2].to_vec()).unwrap();
                let size = usize::from_str_radix(size_text.trim(), 16).unwrap();
                let mut chunk = vec![0u8; size + 2];
                client.read_exact(&mut chunk).await.unwrap();
                if size == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..size]);
            }
        }
        (head, body)
    }

    fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) {
        let path = dir.path().join(name);
        std::fs::File::create(path).unwrap().write_all(content).unwrap()
    }

    #[tokio::test]
    async fn routed_request_keeps_connection_open() {
        let service = HttpService::builder()
            .router(Router::builder().route("/hello", get(Endpoint::sync(hello))).build())
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header_value(&head, "content-length"), Some("2"));
        assert_eq!(header_value(&head, "connection"), Some("keep-alive"));
        assert_eq!(&body[..], b"hi");

        // still open: a second exchange works on the same connection
        client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn index_file_served_for_directory_request() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "index.html", b"hello");

        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header_value(&head, "content-type"), Some("text/html"));
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn ranged_request_gets_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "big.bin", &vec![0x42u8; 1024 * 1024]);

        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /big.bin HTTP/1.1\r\nHost: x\r\nRange: bytes=0-1023\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert_eq!(header_value(&head, "content-range"), Some("bytes 0-1023/1048576"));
        assert_eq!(header_value(&head, "content-length"), Some("1024"));
        assert_eq!(body.len(), 1024);
    }

    #[tokio::test]
    async fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "index.html", b"hello");

        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /static/../../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn missing_file_gets_generated_error_page() {
        let dir = tempfile::tempdir().unwrap();
        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /nope.txt HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains("404 Not Found"));
    }

    #[tokio::test]
    async fn unroutable_post_is_not_implemented() {
        let service = HttpService::builder().enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"POST /anything HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\nhi").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
    }

    #[tokio::test]
    async fn cache_boundary_switches_to_streaming() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "exact.bin", &[1u8; 64]);
        write_file(&dir, "over.bin", &[2u8; 65]);

        let service = HttpService::builder()
            .document_root(dir.path())
            .max_file_cache_size(64)
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        // at the cap: served from the cache, so validators are present
        client.write_all(b"GET /exact.bin HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(header_value(&head, "etag").is_some());
        assert_eq!(body.len(), 64);

        // one byte over: the large-file streamer answers, no validators
        client.write_all(b"GET /over.bin HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(header_value(&head, "etag").is_none());
        assert_eq!(body.len(), 65);
    }

    #[tokio::test]
    async fn limit_rate_zero_forbids_large_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "big.bin", &[3u8; 256]);

        let service = HttpService::builder()
            .document_root(dir.path())
            .max_file_cache_size(64)
            .limit_rate(0)
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /big.bin HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn middleware_short_circuits_pipeline() {
        use crate::pipeline::stage_fn;
        use crate::status::Status;

        let service = HttpService::builder()
            .router(Router::builder().route("/hello", get(Endpoint::sync(hello))).build())
            .middleware(stage_fn(|ctx| {
                if ctx.request.header("x-api-key") == Some("secret") {
                    Status::Next
                } else {
                    Status::Code(StatusCode::UNAUTHORIZED)
                }
            }))
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        // the short-circuit status still gets the generated error page
        assert!(String::from_utf8(body).unwrap().contains("401 Unauthorized"));

        client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nx-api-key: secret\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn conditional_get_not_modified() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "page.html", b"<p>cached</p>");

        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /page.html HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        let etag = header_value(&head, "etag").unwrap().to_string();

        let conditional = format!("GET /page.html HTTP/1.1\r\nHost: x\r\nif-not-match: {etag}\r\n\r\n");
        client.write_all(conditional.as_bytes()).await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(body.is_empty());
        assert!(header_value(&head, "etag").is_none());
    }

    #[tokio::test]
    async fn head_of_cached_file_reports_length_only() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir, "index.html", b"hello");

        let service = HttpService::builder().document_root(dir.path()).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"HEAD /index.html HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(header_value(&head, "accept-ranges"), Some("bytes"));
        assert_eq!(header_value(&head, "content-length"), Some("5"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn forward_proxy_disabled_yields_forbidden() {
        let service = HttpService::builder().enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET http://backend/x HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn websocket_upgrade_computes_accept_key() {
        let service = HttpService::builder().ws_endpoint(NoopWs).enable_access_log(false).build();
        let mut client = spawn_server(service);

        client
            .write_all(
                b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Protocol: chat, superchat\r\n\r\n",
            )
            .await
            .unwrap();

        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert_eq!(header_value(&head, "sec-websocket-accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert_eq!(header_value(&head, "sec-websocket-protocol"), Some("chat"));
        assert_eq!(header_value(&head, "upgrade"), Some("websocket"));
    }

    #[tokio::test]
    async fn unknown_upgrade_token_rejected_and_closed() {
        let service = HttpService::builder().enable_access_log(false).build();
        let mut client = spawn_server(service);

        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: gopher\r\n\r\n").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(header_value(&head, "connection"), Some("close"));

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deferred_handler_streams_through_writer() {
        let service = HttpService::builder()
            .router(Router::builder().route("/defer", crate::router::any(Endpoint::deferred(SlowEcho))).build())
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"POST /defer HTTP/1.1\r\nHost: x\r\nContent-Length: 6\r\n\r\nabcdef").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(&body[..], b"abcdef");
    }

    #[tokio::test]
    async fn reverse_proxy_tunnels_to_upstream() {
        let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();

        let backend_task = tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok").await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });

        let service = HttpService::builder()
            .proxy_pass("/api/", format!("http://{backend_addr}/"))
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /api/users HTTP/1.1\r\nHost: front\r\n\r\n").await.unwrap();
        let (head, body) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(&body[..], b"ok");

        let forwarded = backend_task.await.unwrap();
        assert!(forwarded.starts_with("GET /users HTTP/1.1\r\n"));
        assert!(forwarded.contains("x-real-ip: 10.0.0.7\r\n"));
        assert!(!forwarded.to_ascii_lowercase().contains("proxy-connection"));
    }

    #[tokio::test]
    async fn reverse_proxy_connect_failure_is_bad_gateway() {
        // a bound-then-dropped listener leaves a port nothing listens on
        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let service = HttpService::builder()
            .proxy_pass("/api/", format!("http://{dead_addr}/"))
            .enable_access_log(false)
            .build();
        let mut client = spawn_server(service);

        client.write_all(b"GET /api/users HTTP/1.1\r\nHost: front\r\n\r\n").await.unwrap();
        let (head, _) = read_response(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
    }
}
