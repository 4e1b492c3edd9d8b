//! Observation context for a proxied HTTP call.
//!
//! # Responsibilities
//! - Carry the header collection trace context is injected into
//! - Reference the outgoing request descriptor
//! - Receive the response descriptor exactly once
//!
//! # Design Decisions
//! - Shared as `Arc<GatewayContext>` so both filter stages see one instance
//! - Tags are derived from this context at stop time, not at start, so the
//!   response status is visible to the convention

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use axum::http::HeaderMap;

use crate::exchange::{RequestInfo, ResponseInfo};
use crate::observation::ObservationError;

/// Mutable-field holder for (carrier, request, response).
///
/// `Default` yields a partial context without carrier or request; conventions
/// treat such a context as carrying no tags.
#[derive(Debug, Default)]
pub struct GatewayContext {
    carrier: Option<Mutex<HeaderMap>>,
    request: Option<Arc<RequestInfo>>,
    response: OnceLock<ResponseInfo>,
}

impl GatewayContext {
    pub fn new(carrier: HeaderMap, request: Arc<RequestInfo>) -> Self {
        Self {
            carrier: Some(Mutex::new(carrier)),
            request: Some(request),
            response: OnceLock::new(),
        }
    }

    pub fn has_carrier(&self) -> bool {
        self.carrier.is_some()
    }

    /// Snapshot of the carrier headers.
    pub fn carrier(&self) -> Option<HeaderMap> {
        self.carrier
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Run `f` against the carrier. Returns `None` when there is no carrier.
    pub fn with_carrier<R>(&self, f: impl FnOnce(&mut HeaderMap) -> R) -> Option<R> {
        self.carrier.as_ref().map(|c| {
            let mut headers = c.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut headers)
        })
    }

    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_deref()
    }

    pub fn response(&self) -> Option<&ResponseInfo> {
        self.response.get()
    }

    /// Attach the response. Only the first call takes effect.
    pub fn set_response(&self, response: ResponseInfo) -> Result<(), ObservationError> {
        self.response
            .set(response)
            .map_err(|_| ObservationError::ResponseAlreadySet)
    }
}
