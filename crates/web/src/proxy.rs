//! Forward and reverse proxy engagement.
//!
//! Both proxies end the same way: a connected upstream socket plus a
//! rewritten request head are attached to the response as a tunnel
//! take-over, and the connection core pipes raw bytes both ways. What
//! differs is how the upstream is chosen: the absolute-form request
//! target for a forward proxy, a configured path prefix for a reverse
//! proxy.

use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};
use ferry_http::protocol::RequestHeader;
use http::{StatusCode, Uri};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::service::HttpService;

/// Where a proxied request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProxyTarget {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) secure: bool,
    pub(crate) path_and_query: String,
}

impl ProxyTarget {
    pub(crate) fn from_uri(uri: &Uri) -> Option<Self> {
        let host = uri.host()?.to_string();
        let secure = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".to_string());
        Some(Self { host, port, secure, path_and_query })
    }
}

/// Applies a `Proxy-Connection` override to the computed keep-alive: the
/// `upgrade` token counts as keep-alive, the header itself is dropped
/// before forwarding.
pub(crate) fn proxy_keep_alive(header: &RequestHeader, default: bool) -> bool {
    match header.headers().get("proxy-connection").and_then(|value| value.to_str().ok()) {
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => true,
        Some(value) if value.eq_ignore_ascii_case("close") => false,
        Some(value) if value.eq_ignore_ascii_case("upgrade") => true,
        _ => default,
    }
}

/// Longest-prefix reverse-proxy lookup; returns the rewritten target URL.
pub(crate) fn reverse_proxy_url(service: &HttpService, path: &str) -> Option<String> {
    let matched = service
        .proxies
        .iter()
        .filter(|proxy| path.starts_with(proxy.prefix.as_str()))
        .max_by_key(|proxy| proxy.prefix.len())?;

    let rest = &path[matched.prefix.len()..];
    let upstream = matched.upstream.trim_end_matches('/');
    if rest.is_empty() {
        Some(format!("{upstream}/"))
    } else if rest.starts_with('/') {
        Some(format!("{upstream}{rest}"))
    } else {
        Some(format!("{upstream}/{rest}"))
    }
}

/// Opens the upstream socket. Failures map to gateway statuses: a connect
/// timeout is 504, anything else 502.
pub(crate) async fn connect_upstream(service: &HttpService, target: &ProxyTarget) -> Result<TcpStream, StatusCode> {
    if target.secure {
        // TLS termination lives outside the core; a TLS upstream cannot
        // be tunneled from here
        warn!(host = %target.host, "https upstream is not supported");
        return Err(StatusCode::BAD_GATEWAY);
    }

    info!(host = %target.host, port = target.port, "proxy pass");

    let connect = TcpStream::connect((target.host.as_str(), target.port));
    match service.proxy_connect_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                warn!(host = %target.host, "upstream connect failed: {}", e);
                Err(StatusCode::BAD_GATEWAY)
            }
            Err(_) => {
                warn!(host = %target.host, "upstream connect timed out");
                Err(StatusCode::GATEWAY_TIMEOUT)
            }
        },
        None => match connect.await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                warn!(host = %target.host, "upstream connect failed: {}", e);
                Err(StatusCode::BAD_GATEWAY)
            }
        },
    }
}

/// Serializes the request head for the upstream: origin-form target,
/// `Proxy-Connection` dropped, `Connection` set from the computed
/// keep-alive, `X-Real-IP` naming the client.
pub(crate) fn serialize_head(
    header: &RequestHeader,
    path_and_query: &str,
    keep_alive: bool,
    client_ip: Option<IpAddr>,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(1024);

    buf.put_slice(header.method().as_str().as_bytes());
    buf.put_slice(b" ");
    buf.put_slice(path_and_query.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in header.headers() {
        if name.as_str() == "proxy-connection" || name == &http::header::CONNECTION {
            continue;
        }
        buf.put_slice(name.as_ref());
        buf.put_slice(b": ");
        buf.put_slice(value.as_ref());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"connection: ");
    buf.put_slice(if keep_alive { b"keep-alive" } else { b"close" });
    buf.put_slice(b"\r\n");

    if let Some(ip) = client_ip {
        buf.put_slice(b"x-real-ip: ");
        buf.put_slice(ip.to_string().as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::HttpService;
    use http::Request;

    fn request(raw_headers: &[(&str, &str)]) -> RequestHeader {
        let mut builder = Request::builder().method("GET").uri("http://backend:8080/x?y=1");
        for (name, value) in raw_headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into()
    }

    #[test]
    fn target_from_absolute_uri() {
        let header = request(&[]);
        let target = ProxyTarget::from_uri(header.uri()).unwrap();
        assert_eq!(target.host, "backend");
        assert_eq!(target.port, 8080);
        assert!(!target.secure);
        assert_eq!(target.path_and_query, "/x?y=1");
    }

    #[test]
    fn default_ports_follow_scheme() {
        let uri: Uri = "https://secure.example/x".parse().unwrap();
        let target = ProxyTarget::from_uri(&uri).unwrap();
        assert_eq!(target.port, 443);
        assert!(target.secure);

        let uri: Uri = "http://plain.example/x".parse().unwrap();
        assert_eq!(ProxyTarget::from_uri(&uri).unwrap().port, 80);
    }

    #[test]
    fn proxy_connection_overrides_keep_alive() {
        assert!(proxy_keep_alive(&request(&[("Proxy-Connection", "keep-alive")]), false));
        assert!(!proxy_keep_alive(&request(&[("Proxy-Connection", "close")]), true));
        assert!(proxy_keep_alive(&request(&[("Proxy-Connection", "Upgrade")]), false));
        assert!(proxy_keep_alive(&request(&[]), true));
        assert!(!proxy_keep_alive(&request(&[]), false));
    }

    #[test]
    fn reverse_lookup_longest_prefix_rewrites() {
        let service = HttpService::builder()
            .proxy_pass("/api/", "http://127.0.0.1:9000/")
            .proxy_pass("/api/v2/", "http://127.0.0.1:9002/")
            .build();

        assert_eq!(reverse_proxy_url(&service, "/api/users"), Some("http://127.0.0.1:9000/users".to_string()));
        assert_eq!(reverse_proxy_url(&service, "/api/v2/users"), Some("http://127.0.0.1:9002/users".to_string()));
        assert_eq!(reverse_proxy_url(&service, "/other"), None);
    }

    #[test]
    fn head_rewrite_drops_proxy_connection_sets_real_ip() {
        let header = request(&[("Proxy-Connection", "keep-alive"), ("Host", "backend"), ("Accept", "*/*")]);
        let head = serialize_head(&header, "/x?y=1", true, Some("10.0.0.7".parse().unwrap()));
        let text = String::from_utf8(head.to_vec()).unwrap();

        assert!(text.starts_with("GET /x?y=1 HTTP/1.1\r\n"));
        assert!(!text.to_ascii_lowercase().contains("proxy-connection"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.contains("x-real-ip: 10.0.0.7\r\n"));
        assert!(text.contains("host: backend\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
