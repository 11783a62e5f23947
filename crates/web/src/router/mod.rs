//! Path routing.
//!
//! A [`Router`] maps a path pattern to one or more [`RouterItem`]s; at
//! request time the items are filtered (method, headers) and the first
//! match wins. Patterns use `matchit` syntax (`/users/{id}`).

pub mod filter;

use ferry_http::protocol::RequestHeader;
use std::collections::HashMap;
use tracing::error;

use crate::endpoint::Endpoint;
use filter::{AllFilter, Filter};

type RouterFilter = dyn Filter + Send + Sync + 'static;
type InnerRouter<T> = matchit::Router<T>;

#[derive(Debug)]
pub struct Router {
    inner_router: InnerRouter<Vec<RouterItem>>,
    empty: bool,
}

pub struct RouterItem {
    filter: Box<RouterFilter>,
    endpoint: Endpoint,
}

impl std::fmt::Debug for RouterItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterItem").field("endpoint", &self.endpoint).finish()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Resolves a request to an endpoint: route match first, then the
    /// per-item filters against the request head. Parameters of the
    /// winning pattern are returned as owned pairs.
    pub fn resolve(&self, path: &str, header: &RequestHeader) -> (Option<Endpoint>, Vec<(String, String)>) {
        let matched = match self.inner_router.at(path) {
            Ok(matched) => matched,
            Err(_) => return (None, Vec::new()),
        };

        let endpoint = matched
            .value
            .iter()
            .find(|item| item.filter.check(header))
            .map(|item| item.endpoint.clone());

        let params = matched.params.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();

        (endpoint, params)
    }
}

#[derive(Default)]
pub struct RouterBuilder {
    data: HashMap<String, Vec<RouterItemBuilder>>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self { data: HashMap::new() }
    }

    pub fn route(mut self, route: impl Into<String>, item_builder: RouterItemBuilder) -> Self {
        self.data.entry(route.into()).or_default().push(item_builder);
        self
    }

    pub fn build(self) -> Router {
        let mut inner_router = InnerRouter::new();
        let empty = self.data.is_empty();

        for (path, items) in self.data.into_iter() {
            let router_items = items.into_iter().map(RouterItemBuilder::build).collect::<Vec<_>>();
            if let Err(e) = inner_router.insert(path.clone(), router_items) {
                error!("invalid route pattern '{}': {}", path, e);
            }
        }

        Router { inner_router, empty }
    }
}

pub struct RouterItemBuilder {
    filters: AllFilter,
    endpoint: Endpoint,
}

impl RouterItemBuilder {
    pub fn with<F: Filter + Send + Sync + 'static>(mut self, filter: F) -> Self {
        self.filters.and(filter);
        self
    }

    fn build(self) -> RouterItem {
        RouterItem { filter: Box::new(self.filters), endpoint: self.endpoint }
    }
}

/// Routes an endpoint with no method restriction.
pub fn any(endpoint: Endpoint) -> RouterItemBuilder {
    RouterItemBuilder { filters: filter::all_filter(), endpoint }
}

macro_rules! method_router_item {
    ($method:ident, $method_filter:ident) => {
        pub fn $method(endpoint: Endpoint) -> RouterItemBuilder {
            let mut filters = filter::all_filter();
            filters.and(filter::$method_filter());
            RouterItemBuilder { filters, endpoint }
        }
    };
}

method_router_item!(get, get_method);
method_router_item!(post, post_method);
method_router_item!(put, put_method);
method_router_item!(delete, delete_method);
method_router_item!(head, head_method);
method_router_item!(options, options_method);
method_router_item!(patch, patch_method);
