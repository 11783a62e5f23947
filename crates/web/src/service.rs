//! The service configuration container.
//!
//! An [`HttpService`] bundles everything a connection consults while
//! processing requests: the router, the pipeline stages, static-file and
//! proxy settings, and the shared file cache. It is built once and shared
//! read-only across connections.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ferry_http::websocket::WsEndpoint;

use crate::file_cache::FileCache;
use crate::pipeline::PipelineStage;
use crate::router::Router;

/// A reverse-proxy mapping: requests whose path starts with `prefix` are
/// tunneled to `upstream` with the prefix replaced by the upstream path.
#[derive(Debug, Clone)]
pub struct ProxyPass {
    pub prefix: String,
    pub upstream: String,
}

pub struct HttpService {
    pub(crate) router: Router,

    pub(crate) preprocessor: Option<Arc<dyn PipelineStage>>,
    pub(crate) middleware: Vec<Arc<dyn PipelineStage>>,
    pub(crate) processor: Option<Arc<dyn PipelineStage>>,
    pub(crate) postprocessor: Option<Arc<dyn PipelineStage>>,
    pub(crate) error_handler: Option<Arc<dyn PipelineStage>>,
    pub(crate) static_handler: Option<Arc<dyn PipelineStage>>,
    pub(crate) large_file_handler: Option<Arc<dyn PipelineStage>>,

    pub(crate) document_root: Option<PathBuf>,
    pub(crate) index_file: String,
    pub(crate) error_page: Option<String>,

    /// KiB/s for large-file streaming: negative is unlimited, zero
    /// forbids serving large files at all.
    pub(crate) limit_rate: i64,
    pub(crate) max_file_cache_size: u64,
    /// Cached entries larger than this are released once their response
    /// shipped.
    pub(crate) cache_release_threshold: u64,
    pub(crate) file_cache: Arc<FileCache>,

    pub(crate) enable_forward_proxy: bool,
    pub(crate) proxies: Vec<ProxyPass>,
    pub(crate) proxy_connect_timeout: Option<Duration>,
    pub(crate) proxy_read_timeout: Option<Duration>,
    pub(crate) proxy_write_timeout: Option<Duration>,

    pub(crate) ws_endpoint: Option<Arc<dyn WsEndpoint>>,
    pub(crate) ping_interval: Option<Duration>,

    pub(crate) enable_access_log: bool,
}

impl HttpService {
    pub fn builder() -> HttpServiceBuilder {
        HttpServiceBuilder::new()
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.file_cache
    }
}

pub struct HttpServiceBuilder {
    service: HttpService,
}

impl HttpServiceBuilder {
    fn new() -> Self {
        Self {
            service: HttpService {
                router: Router::builder().build(),
                preprocessor: None,
                middleware: Vec::new(),
                processor: None,
                postprocessor: None,
                error_handler: None,
                static_handler: None,
                large_file_handler: None,
                document_root: None,
                index_file: "index.html".to_string(),
                error_page: None,
                limit_rate: -1,
                max_file_cache_size: 4 * 1024 * 1024,
                cache_release_threshold: 1024 * 1024,
                file_cache: Arc::new(FileCache::new()),
                enable_forward_proxy: false,
                proxies: Vec::new(),
                proxy_connect_timeout: Some(Duration::from_secs(10)),
                proxy_read_timeout: None,
                proxy_write_timeout: None,
                ws_endpoint: None,
                ping_interval: None,
                enable_access_log: true,
            },
        }
    }

    pub fn router(mut self, router: Router) -> Self {
        self.service.router = router;
        self
    }

    pub fn preprocessor(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.preprocessor = Some(Arc::new(stage));
        self
    }

    pub fn middleware(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.middleware.push(Arc::new(stage));
        self
    }

    pub fn processor(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.processor = Some(Arc::new(stage));
        self
    }

    pub fn postprocessor(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.postprocessor = Some(Arc::new(stage));
        self
    }

    pub fn error_handler(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.error_handler = Some(Arc::new(stage));
        self
    }

    pub fn static_handler(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.static_handler = Some(Arc::new(stage));
        self
    }

    pub fn large_file_handler(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.service.large_file_handler = Some(Arc::new(stage));
        self
    }

    pub fn document_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.service.document_root = Some(root.into());
        self
    }

    pub fn index_file(mut self, index: impl Into<String>) -> Self {
        self.service.index_file = index.into();
        self
    }

    pub fn error_page(mut self, page: impl Into<String>) -> Self {
        self.service.error_page = Some(page.into());
        self
    }

    pub fn limit_rate(mut self, kib_per_second: i64) -> Self {
        self.service.limit_rate = kib_per_second;
        self
    }

    pub fn max_file_cache_size(mut self, bytes: u64) -> Self {
        self.service.max_file_cache_size = bytes;
        self
    }

    pub fn cache_release_threshold(mut self, bytes: u64) -> Self {
        self.service.cache_release_threshold = bytes;
        self
    }

    pub fn enable_forward_proxy(mut self, enable: bool) -> Self {
        self.service.enable_forward_proxy = enable;
        self
    }

    pub fn proxy_pass(mut self, prefix: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.service.proxies.push(ProxyPass { prefix: prefix.into(), upstream: upstream.into() });
        self
    }

    pub fn proxy_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.service.proxy_connect_timeout = timeout;
        self
    }

    pub fn proxy_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.service.proxy_read_timeout = timeout;
        self
    }

    pub fn proxy_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.service.proxy_write_timeout = timeout;
        self
    }

    pub fn ws_endpoint(mut self, endpoint: impl WsEndpoint + 'static) -> Self {
        self.service.ws_endpoint = Some(Arc::new(endpoint));
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.service.ping_interval = Some(interval);
        self
    }

    pub fn enable_access_log(mut self, enable: bool) -> Self {
        self.service.enable_access_log = enable;
        self
    }

    pub fn build(self) -> Arc<HttpService> {
        Arc::new(self.service)
    }
}
