//! Cached `Date` header value.
//!
//! Formatting an HTTP date per response is wasteful under load; a
//! background task refreshes the formatted value about once per second
//! and responses read it lock-free.

use arc_swap::ArcSwap;
use http::HeaderValue;
use httpdate::fmt_http_date;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub(crate) struct DateService {
    current: Arc<ArcSwap<HeaderValue>>,
    handle: tokio::task::JoinHandle<()>,
}

impl DateService {
    /// Must be created inside a tokio runtime.
    pub(crate) fn new() -> Self {
        let current = Arc::new(ArcSwap::from_pointee(format_now()));
        let current_arc = Arc::clone(&current);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(700)).await;
                current_arc.store(Arc::new(format_now()));
            }
        });

        DateService { current, handle }
    }

    pub(crate) fn http_date(&self) -> HeaderValue {
        self.current.load().as_ref().clone()
    }
}

fn format_now() -> HeaderValue {
    HeaderValue::try_from(fmt_http_date(SystemTime::now())).expect("http date is a valid header value")
}

impl Drop for DateService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_http_date_format() {
        let service = DateService::new();
        let value = service.http_date();
        let text = value.to_str().unwrap();
        // e.g. "Sun, 06 Nov 1994 08:49:37 GMT"
        assert!(text.ends_with(" GMT"));
        assert_eq!(text.len(), 29);
    }
}
