//! Naming and tagging conventions for gateway observations.
//!
//! # Design Decisions
//! - Low-cardinality tags are kept apart from the contextual name so the
//!   metrics backend can aggregate on the former while spans show the latter
//! - The default convention tags the full request URI. URI values are
//!   unbounded, which is a known cardinality risk; `UriTagMode` lets a
//!   deployment opt into `Path` or `Omit` instead

use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use crate::config::UriTagMode;
use crate::observation::catalog::LowCardinalityKey;
use crate::observation::{GatewayContext, KeyName, KeyValues};

/// Derives the name, contextual name and tags of a gateway observation.
pub trait GatewayObservationConvention: Send + Sync + Debug {
    /// Technical name used for metrics and spans. Must not depend on the
    /// request.
    fn name(&self) -> &str;

    /// Human-readable label for tracing UIs.
    fn contextual_name(&self, context: &GatewayContext) -> Option<String>;

    /// Tags safe to aggregate on. Must never panic.
    fn low_cardinality_key_values(&self, context: &GatewayContext) -> KeyValues;

    fn high_cardinality_key_values(&self, _context: &GatewayContext) -> KeyValues {
        KeyValues::empty()
    }
}

/// Name of the outbound gateway HTTP observation.
pub const HTTP_CLIENT_REQUESTS: &str = "http.client.requests";

/// Out-of-the-box convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGatewayObservationConvention {
    uri_tag: UriTagMode,
}

impl DefaultGatewayObservationConvention {
    pub fn new(uri_tag: UriTagMode) -> Self {
        Self { uri_tag }
    }

    /// The process-wide default instance (full URI tagging).
    pub fn shared() -> Arc<dyn GatewayObservationConvention> {
        static INSTANCE: OnceLock<Arc<dyn GatewayObservationConvention>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| Arc::new(DefaultGatewayObservationConvention::default()))
            .clone()
    }

    pub fn uri_tag(&self) -> UriTagMode {
        self.uri_tag
    }
}

impl GatewayObservationConvention for DefaultGatewayObservationConvention {
    fn name(&self) -> &str {
        HTTP_CLIENT_REQUESTS
    }

    fn contextual_name(&self, context: &GatewayContext) -> Option<String> {
        context
            .request()
            .map(|request| format!("HTTP {}", request.method))
    }

    fn low_cardinality_key_values(&self, context: &GatewayContext) -> KeyValues {
        let mut kvs = KeyValues::empty();
        if !context.has_carrier() {
            return kvs;
        }

        if let Some(request) = context.request() {
            kvs.insert(LowCardinalityKey::Method.with_value(request.method.as_str()));
            // The full URI is high cardinality: one time series per distinct URI.
            // TODO: bucket URIs by route template once routes are known to the gateway
            match self.uri_tag {
                UriTagMode::Full => {
                    kvs.insert(LowCardinalityKey::Uri.with_value(request.uri.to_string()))
                }
                UriTagMode::Path => {
                    kvs.insert(LowCardinalityKey::Uri.with_value(request.uri.path()))
                }
                UriTagMode::Omit => {}
            }
        }

        if let Some(status) = context.response().and_then(|r| r.status) {
            kvs.insert(LowCardinalityKey::Status.with_value(status.as_u16().to_string()));
        }

        kvs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{RequestInfo, ResponseInfo};
    use axum::http::{HeaderMap, Method, StatusCode, Uri};

    fn context() -> GatewayContext {
        let request = RequestInfo::new(
            Method::GET,
            Uri::from_static("http://localhost:8080/get?id=1"),
        );
        GatewayContext::new(HeaderMap::new(), Arc::new(request))
    }

    #[test]
    fn test_no_carrier_no_tags() {
        let convention = DefaultGatewayObservationConvention::default();
        assert!(convention
            .low_cardinality_key_values(&GatewayContext::default())
            .is_empty());
    }

    #[test]
    fn test_status_only_after_response() {
        let convention = DefaultGatewayObservationConvention::default();
        let ctx = context();

        let before = convention.low_cardinality_key_values(&ctx);
        assert_eq!(before.get("method"), Some("GET"));
        assert_eq!(before.get("uri"), Some("http://localhost:8080/get?id=1"));
        assert!(!before.contains_key("status"));

        ctx.set_response(ResponseInfo::with_status(StatusCode::SERVICE_UNAVAILABLE))
            .unwrap();
        let after = convention.low_cardinality_key_values(&ctx);
        assert_eq!(after.get("status"), Some("503"));
    }

    #[test]
    fn test_response_without_status() {
        let convention = DefaultGatewayObservationConvention::default();
        let ctx = context();
        ctx.set_response(ResponseInfo::default()).unwrap();

        assert!(!convention.low_cardinality_key_values(&ctx).contains_key("status"));
    }

    #[test]
    fn test_uri_modes() {
        let ctx = context();

        let path = DefaultGatewayObservationConvention::new(UriTagMode::Path);
        assert_eq!(path.low_cardinality_key_values(&ctx).get("uri"), Some("/get"));

        let omit = DefaultGatewayObservationConvention::new(UriTagMode::Omit);
        let kvs = omit.low_cardinality_key_values(&ctx);
        assert!(!kvs.contains_key("uri"));
        assert_eq!(kvs.get("method"), Some("GET"));
    }

    #[test]
    fn test_names() {
        let convention = DefaultGatewayObservationConvention::default();
        assert_eq!(convention.name(), "http.client.requests");
        assert_eq!(convention.contextual_name(&context()).as_deref(), Some("HTTP GET"));
        assert!(convention.contextual_name(&GatewayContext::default()).is_none());
    }
}
