//! Per-request exchange state shared between the request and response
//! header filter stages.
//!
//! # Responsibilities
//! - Describe the outgoing request (method, URI, headers)
//! - Describe the upstream response once it is known (status, headers)
//! - Hold string-keyed attributes scoped to one proxied call
//!
//! # Design Decisions
//! - Passed by `&mut` between stages; sequencing is the caller's job, no locks
//! - Attributes are typed on read (`get::<T>`), keys are documented constants
//! - The request descriptor is behind an `Arc` so observation contexts can
//!   reference it without copying

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::{request, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

/// Attribute key under which the host stores an already-running parent
/// observation (for example the inbound server observation).
pub const PARENT_OBSERVATION_ATTRIBUTE: &str = "server.observation";

/// Descriptor of the request being proxied.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Append a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }
}

impl From<&request::Parts> for RequestInfo {
    fn from(parts: &request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }
}

/// Descriptor of the upstream response. The status stays `None` until the
/// host has received one.
#[derive(Debug, Clone, Default)]
pub struct ResponseInfo {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
}

impl ResponseInfo {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            headers: HeaderMap::new(),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

/// String-keyed, exchange-scoped attribute store.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Borrow the value under `key` if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove and return the value under `key`.
    ///
    /// A value of another type is left in place.
    pub fn remove<T: Any + Send + Sync>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key).is_some_and(|v| v.is::<T>()) {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// One proxied call: request, response and attributes.
#[derive(Debug)]
pub struct Exchange {
    request: Arc<RequestInfo>,
    response: ResponseInfo,
    attributes: Attributes,
}

impl Exchange {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request: Arc::new(request),
            response: ResponseInfo::default(),
            attributes: Attributes::new(),
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Shared handle to the request descriptor.
    pub fn request_arc(&self) -> Arc<RequestInfo> {
        Arc::clone(&self.request)
    }

    pub fn response(&self) -> &ResponseInfo {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseInfo {
        &mut self.response
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_typed_access() {
        let mut attrs = Attributes::new();
        attrs.insert("answer", 42u32);

        assert_eq!(attrs.get::<u32>("answer"), Some(&42));
        assert!(attrs.get::<String>("answer").is_none());
        assert!(attrs.get::<u32>("missing").is_none());

        // Wrong type leaves the value in place
        assert!(attrs.remove::<String>("answer").is_none());
        assert!(attrs.contains("answer"));

        assert_eq!(attrs.remove::<u32>("answer"), Some(42));
        assert!(!attrs.contains("answer"));
    }

    #[test]
    fn test_request_info_headers() {
        let info = RequestInfo::new(Method::GET, Uri::from_static("http://localhost:8080/get"))
            .with_header("X-A", "aValue")
            .with_header("bad header", "ignored");

        assert_eq!(info.headers.len(), 1);
        assert_eq!(info.headers.get("x-a").unwrap(), "aValue");
    }

    #[test]
    fn test_exchange_response_starts_empty() {
        let mut exchange = Exchange::new(RequestInfo::new(Method::GET, Uri::from_static("/")));
        assert!(exchange.response().status.is_none());

        exchange.response_mut().set_status(StatusCode::OK);
        assert_eq!(exchange.response().status, Some(StatusCode::OK));
    }
}
