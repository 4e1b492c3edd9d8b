//! HTTP header filters run around the upstream call.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → HeadersFilterChain::filter_request (request.rs starts observation)
//!     → forwarded upstream
//! upstream response
//!     → HeadersFilterChain::filter_response (response.rs stops observation)
//! ```
//!
//! # Design Decisions
//! - Filters never fail; instrumentation must not affect delivery
//! - State between stages lives in the `Exchange` attributes

pub mod request;
pub mod response;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::exchange::Exchange;

pub use request::ObservedRequestHttpHeadersFilter;
pub use response::ObservedResponseHttpHeadersFilter;

/// Attribute key of the started client observation.
pub const OBSERVATION_ATTRIBUTE: &str = "gateway.observation";

/// Attribute key of the client observation's context.
pub const OBSERVATION_CONTEXT_ATTRIBUTE: &str = "gateway.observation.context";

/// Which side of the exchange a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Request,
    Response,
}

/// Transforms a header collection in the context of an exchange.
pub trait HttpHeadersFilter: Send + Sync {
    fn filter(&self, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap;

    fn supports(&self, filter_type: FilterType) -> bool {
        filter_type == FilterType::Request
    }
}

/// Ordered list of header filters.
#[derive(Clone, Default)]
pub struct HeadersFilterChain {
    filters: Vec<Arc<dyn HttpHeadersFilter>>,
}

impl HeadersFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Arc<dyn HttpHeadersFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filter_request(&self, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap {
        self.apply(FilterType::Request, input, exchange)
    }

    pub fn filter_response(&self, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap {
        self.apply(FilterType::Response, input, exchange)
    }

    fn apply(&self, filter_type: FilterType, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap {
        self.filters
            .iter()
            .filter(|f| f.supports(filter_type))
            .fold(input.clone(), |headers, f| f.filter(&headers, exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::RequestInfo;
    use axum::http::{HeaderValue, Method, Uri};

    struct AddHeader(&'static str, FilterType);

    impl HttpHeadersFilter for AddHeader {
        fn filter(&self, input: &HeaderMap, _exchange: &mut Exchange) -> HeaderMap {
            let mut headers = input.clone();
            headers.append(self.0, HeaderValue::from_static("1"));
            headers
        }

        fn supports(&self, filter_type: FilterType) -> bool {
            filter_type == self.1
        }
    }

    #[test]
    fn test_chain_applies_supported_filters_in_order() {
        let chain = HeadersFilterChain::new()
            .with_filter(Arc::new(AddHeader("x-first", FilterType::Request)))
            .with_filter(Arc::new(AddHeader("x-response", FilterType::Response)))
            .with_filter(Arc::new(AddHeader("x-second", FilterType::Request)));
        let mut exchange = Exchange::new(RequestInfo::new(Method::GET, Uri::from_static("/")));

        let request = chain.filter_request(&HeaderMap::new(), &mut exchange);
        assert!(request.contains_key("x-first"));
        assert!(request.contains_key("x-second"));
        assert!(!request.contains_key("x-response"));

        let response = chain.filter_response(&HeaderMap::new(), &mut exchange);
        assert_eq!(response.len(), 1);
        assert!(response.contains_key("x-response"));
    }
}
