//! Static and large-file serving.
//!
//! Paths resolve under the service's document root after a safety check;
//! directory requests map to the index file. `Range` requests either read
//! the span into memory (under the cache cap) or stream it; whole files go
//! through the shared cache with conditional-GET handling, falling back to
//! the paced streamer when the cache refuses the size.

use std::io::SeekFrom;
use std::path::PathBuf;

use http::{HeaderValue, Method, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::body::ResponseBody;
use crate::context::HttpContext;
use crate::file_body::FileBody;
use crate::file_cache::{CacheError, OpenParam};
use crate::status::Status;

pub(crate) async fn serve_static(ctx: &mut HttpContext) -> Status {
    let path = ctx.request.path().to_string();

    // reject anything that could escape the document root
    if !path.starts_with('/') || path.contains("/../") {
        return Status::Code(StatusCode::BAD_REQUEST);
    }

    let service = ctx.service.clone();
    let document_root = match &service.document_root {
        Some(root) => root,
        None => return Status::Code(StatusCode::NOT_FOUND),
    };

    let filepath = if path.ends_with('/') {
        document_root.join(path.trim_start_matches('/')).join(&service.index_file)
    } else {
        document_root.join(path.trim_start_matches('/'))
    };

    // Range: serve the span directly, bypassing the cache
    if let Some(range_value) = ctx.request.header("range") {
        if let Some((from, to)) = parse_range(range_value) {
            return serve_range(ctx, filepath, from, to).await;
        }
    }

    let is_head = ctx.request.method() == &Method::HEAD;
    let param = OpenParam { max_read: service.max_file_cache_size, need_read: !is_head };

    let entry = match service.file_cache.open(&filepath, &param).await {
        Ok(entry) => entry,
        Err(CacheError::OverLimit { size, limit }) => {
            debug!(path = %filepath.display(), size, limit, "over cache limit, streaming");
            return serve_large_file(ctx, filepath, None).await;
        }
        Err(_) => return Status::Code(StatusCode::NOT_FOUND),
    };

    // conditional GET against the cached validators
    if let Some(if_not_match) = ctx.request.header("if-not-match") {
        if if_not_match == entry.etag {
            return Status::Code(StatusCode::NOT_MODIFIED);
        }
    }
    if let Some(if_modified_since) = ctx.request.header("if-modified-since") {
        if if_modified_since == entry.last_modified {
            return Status::Code(StatusCode::NOT_MODIFIED);
        }
    }

    ctx.response.cache_entry = Some(entry);
    Status::Code(StatusCode::OK)
}

async fn serve_range(ctx: &mut HttpContext, filepath: PathBuf, from: u64, to: u64) -> Status {
    let service = ctx.service.clone();

    let mut file = match File::open(&filepath).await {
        Ok(file) => file,
        Err(_) => return Status::Code(StatusCode::NOT_FOUND),
    };
    let total = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(_) => return Status::Code(StatusCode::NOT_FOUND),
    };

    if from >= total {
        return Status::Code(StatusCode::RANGE_NOT_SATISFIABLE);
    }
    // an absent or oversized end means "through the last byte"
    let to = if to == 0 || to >= total { total - 1 } else { to };
    let content_length = to - from + 1;

    if file.seek(SeekFrom::Start(from)).await.is_err() {
        return Status::Code(StatusCode::INTERNAL_SERVER_ERROR);
    }

    ctx.response.status = StatusCode::PARTIAL_CONTENT;
    set_content_type(ctx, &filepath);
    let content_range = format!("bytes {from}-{to}/{total}");
    if let Ok(value) = HeaderValue::try_from(content_range) {
        ctx.response.headers.insert(http::header::CONTENT_RANGE, value);
    }

    if content_length < service.max_file_cache_size {
        let mut buf = vec![0u8; content_length as usize];
        if file.read_exact(&mut buf).await.is_err() {
            ctx.response.body = ResponseBody::empty();
            return Status::Code(StatusCode::INTERNAL_SERVER_ERROR);
        }
        ctx.response.body = ResponseBody::once(buf);
        Status::Code(StatusCode::PARTIAL_CONTENT)
    } else {
        serve_large_file(ctx, filepath, Some((file, content_length))).await
    }
}

/// Streams a file too large for the cache. `opened` carries a
/// pre-positioned file and the byte count for ranged requests.
pub(crate) async fn serve_large_file(
    ctx: &mut HttpContext,
    filepath: PathBuf,
    opened: Option<(File, u64)>,
) -> Status {
    let service = ctx.service.clone();

    if let Some(large_file_handler) = &service.large_file_handler {
        return large_file_handler.handle(ctx).await;
    }

    let (file, remaining) = match opened {
        Some(pair) => pair,
        None => {
            let file = match File::open(&filepath).await {
                Ok(file) => file,
                Err(_) => return Status::Code(StatusCode::NOT_FOUND),
            };
            let size = match file.metadata().await {
                Ok(metadata) => metadata.len(),
                Err(_) => return Status::Code(StatusCode::NOT_FOUND),
            };
            set_content_type(ctx, &filepath);
            (file, size)
        }
    };

    if service.limit_rate == 0 {
        // forbidden, and deliberately bodyless: the writer produces the
        // bare 403 so no error page is attached
        warn!(path = %filepath.display(), "large file serving forbidden by limit_rate");
        ctx.writer.set_status(StatusCode::FORBIDDEN);
        let _ = ctx.writer.end();
        return Status::Next;
    }

    let status = ctx.response.status;
    ctx.response.body = ResponseBody::file(FileBody::new(file, remaining, service.limit_rate));
    Status::Code(status)
}

fn set_content_type(ctx: &mut HttpContext, filepath: &std::path::Path) {
    let mime = mime_guess::from_path(filepath).first_or_octet_stream();
    if let Ok(value) = HeaderValue::try_from(mime.essence_str()) {
        ctx.response.headers.insert(http::header::CONTENT_TYPE, value);
    }
}

/// Parses a single-span `Range: bytes=from-to` header; `to` is 0 when
/// open-ended.
pub(crate) fn parse_range(value: &str) -> Option<(u64, u64)> {
    let raw = value.trim().strip_prefix("bytes=")?;
    let (from, to) = raw.split_once('-')?;
    let from = from.trim().parse::<u64>().ok()?;
    let to = match to.trim() {
        "" => 0,
        text => text.parse::<u64>().ok()?,
    };
    Some((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_forms() {
        assert_eq!(parse_range("bytes=0-1023"), Some((0, 1023)));
        assert_eq!(parse_range("bytes=500-"), Some((500, 0)));
        assert_eq!(parse_range("bytes = 1-2"), None);
        assert_eq!(parse_range("items=0-1"), None);
        assert_eq!(parse_range("bytes=a-b"), None);
    }
}
