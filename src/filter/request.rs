//! Request-side header filter that starts the client observation.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::exchange::{Exchange, PARENT_OBSERVATION_ATTRIBUTE};
use crate::filter::{FilterType, HttpHeadersFilter, OBSERVATION_ATTRIBUTE, OBSERVATION_CONTEXT_ATTRIBUTE};
use crate::observation::{
    GatewayContext, GatewayObservationConvention, Observation, ObservationRegistry,
    GATEWAY_HTTP_CLIENT_OBSERVATION,
};

/// Starts one observation per proxied request and stores it, together with
/// its context, in the exchange attributes.
///
/// The returned headers are a copy of the input carrying whatever the
/// registry's propagation handler injected during `start`.
#[derive(Debug, Clone)]
pub struct ObservedRequestHttpHeadersFilter {
    registry: ObservationRegistry,
    custom_convention: Option<Arc<dyn GatewayObservationConvention>>,
}

impl ObservedRequestHttpHeadersFilter {
    pub fn new(registry: ObservationRegistry) -> Self {
        Self {
            registry,
            custom_convention: None,
        }
    }

    /// Use `convention` instead of the default one.
    pub fn with_convention(
        registry: ObservationRegistry,
        convention: Arc<dyn GatewayObservationConvention>,
    ) -> Self {
        Self {
            registry,
            custom_convention: Some(convention),
        }
    }
}

impl HttpHeadersFilter for ObservedRequestHttpHeadersFilter {
    fn filter(&self, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap {
        tracing::debug!(headers = ?input, "Will instrument the HTTP request headers");

        let context = Arc::new(GatewayContext::new(input.clone(), exchange.request_arc()));
        let observation = GATEWAY_HTTP_CLIENT_OBSERVATION.observation(
            self.custom_convention.clone(),
            (GATEWAY_HTTP_CLIENT_OBSERVATION.default_convention)(),
            Arc::clone(&context),
            &self.registry,
        );

        if let Some(parent) = exchange
            .attributes()
            .get::<Observation>(PARENT_OBSERVATION_ATTRIBUTE)
        {
            if let Err(e) = observation.set_parent(parent) {
                tracing::warn!(error = %e, "Failed to link parent observation");
            }
        }

        if let Err(e) = observation.start() {
            tracing::warn!(error = %e, "Failed to start client observation");
        }

        let headers = context.carrier().unwrap_or_else(|| input.clone());
        tracing::debug!(
            observation = %observation.id(),
            parent = ?observation.parent().map(Observation::id),
            headers = ?headers,
            "Client observation created for the request"
        );

        let attributes = exchange.attributes_mut();
        attributes.insert(OBSERVATION_ATTRIBUTE, observation);
        attributes.insert(OBSERVATION_CONTEXT_ATTRIBUTE, context);
        headers
    }

    fn supports(&self, filter_type: FilterType) -> bool {
        filter_type == FilterType::Request
    }
}
