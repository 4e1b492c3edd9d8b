//! Catalog of the observations the gateway emits.
//!
//! Each entry names an observation kind, its default convention and the
//! closed set of low-cardinality tag names it may carry. Tests check every
//! convention against this table; nothing in the hot path does.

use std::sync::Arc;

use crate::observation::convention::{
    DefaultGatewayObservationConvention, GatewayObservationConvention,
};
use crate::observation::{GatewayContext, KeyName, KeyValues, Observation, ObservationRegistry};

/// Low-cardinality tag names of the gateway HTTP client observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowCardinalityKey {
    /// HTTP method.
    Method,
    /// HTTP status code, present once the response is known.
    Status,
    /// HTTP URI. Unbounded value space.
    Uri,
}

impl KeyName for LowCardinalityKey {
    fn as_str(&self) -> &'static str {
        match self {
            LowCardinalityKey::Method => "method",
            LowCardinalityKey::Status => "status",
            LowCardinalityKey::Uri => "uri",
        }
    }
}

/// A documented observation kind.
#[derive(Debug)]
pub struct DocumentedObservation {
    pub id: &'static str,
    pub description: &'static str,
    pub default_convention: fn() -> Arc<dyn GatewayObservationConvention>,
    pub low_cardinality_keys: &'static [LowCardinalityKey],
}

/// Observation created when sending a request through the gateway.
pub static GATEWAY_HTTP_CLIENT_OBSERVATION: DocumentedObservation = DocumentedObservation {
    id: "gateway.http.client",
    description: "Observation created when sending a request through the gateway",
    default_convention: DefaultGatewayObservationConvention::shared,
    low_cardinality_keys: &[
        LowCardinalityKey::Method,
        LowCardinalityKey::Status,
        LowCardinalityKey::Uri,
    ],
};

/// Every observation kind the gateway emits.
pub static CATALOG: &[&DocumentedObservation] = &[&GATEWAY_HTTP_CLIENT_OBSERVATION];

/// Find a catalog entry by id.
pub fn lookup(id: &str) -> Option<&'static DocumentedObservation> {
    CATALOG.iter().copied().find(|entry| entry.id == id)
}

impl DocumentedObservation {
    /// Create a not-yet-started observation of this kind.
    ///
    /// `custom` wins over `default` when given.
    pub fn observation(
        &self,
        custom: Option<Arc<dyn GatewayObservationConvention>>,
        default: Arc<dyn GatewayObservationConvention>,
        context: Arc<GatewayContext>,
        registry: &ObservationRegistry,
    ) -> Observation {
        let convention = custom.unwrap_or(default);
        Observation::for_context(convention, context, registry)
    }

    pub fn declares(&self, key: &str) -> bool {
        self.low_cardinality_keys.iter().any(|k| k.as_str() == key)
    }

    /// Tag names in `kvs` this kind does not declare.
    pub fn undeclared_keys<'a>(&self, kvs: &'a KeyValues) -> Vec<&'a str> {
        kvs.keys().filter(|key| !self.declares(key)).collect()
    }
}
