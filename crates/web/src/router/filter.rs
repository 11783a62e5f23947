//! Route filters: predicates over the request head, composed per route
//! item.

use ferry_http::protocol::RequestHeader;
use http::{HeaderName, HeaderValue, Method};

pub trait Filter: Send + Sync {
    fn check(&self, header: &RequestHeader) -> bool;
}

struct FnFilter<F: Fn(&RequestHeader) -> bool>(F);

impl<F: Fn(&RequestHeader) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn check(&self, header: &RequestHeader) -> bool {
        (self.0)(header)
    }
}

pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&RequestHeader) -> bool + Send + Sync,
{
    FnFilter(f)
}

pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// AND-composition: every inner filter must pass; an empty set passes.
pub struct AllFilter {
    filters: Vec<Box<dyn Filter + Send + Sync>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    pub fn and<F: Filter + Send + Sync + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AllFilter {
    fn check(&self, header: &RequestHeader) -> bool {
        self.filters.iter().all(|filter| filter.check(header))
    }
}

pub struct MethodFilter(Method);

impl Filter for MethodFilter {
    fn check(&self, header: &RequestHeader) -> bool {
        self.0.eq(header.method())
    }
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[inline]
        pub fn $method() -> MethodFilter {
            MethodFilter(Method::$upper_case_method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(patch_method, PATCH);

/// Requires an exact header value.
pub fn header<K, V>(header_name: K, header_value: V) -> HeaderFilter
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = <HeaderName as TryFrom<K>>::try_from(header_name).map_err(Into::into).expect("invalid header name");
    let value =
        <HeaderValue as TryFrom<V>>::try_from(header_value).map_err(Into::into).expect("invalid header value");
    HeaderFilter(name, value)
}

pub struct HeaderFilter(HeaderName, HeaderValue);

impl Filter for HeaderFilter {
    fn check(&self, header: &RequestHeader) -> bool {
        header.headers().get(&self.0).map(|value| self.1.eq(value)).unwrap_or(false)
    }
}
