//! Request head handling.
//!
//! [`RequestHeader`] wraps `http::Request<()>` and adds the inspection the
//! connection driver needs before a body is attached: keep-alive
//! computation, upgrade detection, `Expect: 100-continue` detection.

use std::net::SocketAddr;

use http::request::Parts;
use http::{header, HeaderMap, Method, Request, Uri, Version};

/// The peer address of the connection a request arrived on, carried in the
/// request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Whether the request arrived on a TLS transport, carried in the request
/// extensions. The core never terminates TLS itself; it only observes the
/// flag to pick the request scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Secure(pub bool);

/// An HTTP request head, before its body is attached.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, turning the head into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The peer address recorded by the connection driver, if any.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.inner.extensions().get::<ClientAddr>().map(|addr| addr.0)
    }

    /// The request scheme as determined by the transport (`https` on TLS).
    pub fn scheme(&self) -> &'static str {
        match self.inner.extensions().get::<Secure>() {
            Some(Secure(true)) => "https",
            _ => "http",
        }
    }

    /// Whether this request's method may carry a body.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Computes connection persistence: HTTP/1.1 defaults to keep-alive,
    /// HTTP/1.0 to close, and an explicit `Connection` header overrides
    /// either default.
    pub fn is_keep_alive(&self) -> bool {
        let default = self.version() != Version::HTTP_10;
        match self.headers().get(header::CONNECTION).and_then(|value| value.to_str().ok()) {
            Some(value) if value.eq_ignore_ascii_case("close") => false,
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
            _ => default,
        }
    }

    /// The `Upgrade` token, when the client asks to switch protocols.
    pub fn upgrade_token(&self) -> Option<&str> {
        self.headers().get(header::UPGRADE).and_then(|value| value.to_str().ok()).map(str::trim)
    }

    /// True when the client expects an interim `100 Continue` before it
    /// sends the request body. The match is on the `100-` prefix, as some
    /// clients append parameters.
    pub fn expect_continue(&self) -> bool {
        match self.headers().get(header::EXPECT) {
            Some(value) => value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"),
            None => false,
        }
    }

    /// True when the request target is in absolute form (`GET http://…`),
    /// which is how a forward-proxy client addresses an origin.
    pub fn is_absolute_form(&self) -> bool {
        self.uri().scheme().is_some() && self.uri().authority().is_some()
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// Builds a request head from a finished `httparse` parse.
impl<'headers, 'buf> From<httparse::Request<'headers, 'buf>> for RequestHeader {
    fn from(req: httparse::Request<'headers, 'buf>) -> Self {
        let mut builder = Request::builder()
            .method(req.method.unwrap())
            .uri(req.path.unwrap())
            .version(match req.version.unwrap() {
                0 => Version::HTTP_10,
                _ => Version::HTTP_11,
            });

        builder.headers_mut().unwrap().reserve(req.headers.len());
        for header in req.headers.iter() {
            builder = builder.header(header.name, header.value)
        }

        RequestHeader { inner: builder.body(()).unwrap() }
    }
}
