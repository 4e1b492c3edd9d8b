//! Response-side header filter that stops the client observation.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::exchange::Exchange;
use crate::filter::{FilterType, HttpHeadersFilter, OBSERVATION_ATTRIBUTE, OBSERVATION_CONTEXT_ATTRIBUTE};
use crate::observation::{GatewayContext, Observation};

/// Attaches the upstream response to the stored observation context and
/// stops the observation. Headers pass through unchanged.
///
/// The stored pair is removed from the exchange, so a second invocation is
/// a no-op like an invocation without a preceding request-side start.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedResponseHttpHeadersFilter;

impl ObservedResponseHttpHeadersFilter {
    pub fn new() -> Self {
        Self
    }

    /// Stop a dangling observation when the exchange fails before a response
    /// arrives. Returns true if an observation was stopped.
    pub fn close_with_error(exchange: &mut Exchange, error: &str) -> bool {
        let Some((observation, _context)) = take_stored(exchange) else {
            return false;
        };
        observation.error(error);
        stop(&observation)
    }
}

fn take_stored(exchange: &mut Exchange) -> Option<(Observation, Option<Arc<GatewayContext>>)> {
    let attributes = exchange.attributes_mut();
    let observation = attributes.remove::<Observation>(OBSERVATION_ATTRIBUTE)?;
    let context = attributes.remove::<Arc<GatewayContext>>(OBSERVATION_CONTEXT_ATTRIBUTE);
    Some((observation, context))
}

fn stop(observation: &Observation) -> bool {
    match observation.stop() {
        Ok(()) => {
            tracing::debug!(
                observation = %observation.id(),
                tags = %observation.low_cardinality_key_values(),
                "Client observation stopped"
            );
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to stop client observation");
            false
        }
    }
}

impl HttpHeadersFilter for ObservedResponseHttpHeadersFilter {
    fn filter(&self, input: &HeaderMap, exchange: &mut Exchange) -> HeaderMap {
        let Some((observation, context)) = take_stored(exchange) else {
            tracing::debug!("No client observation stored for this exchange");
            return input.clone();
        };

        match context.or_else(|| observation.context().cloned()) {
            Some(context) => {
                if let Err(e) = context.set_response(exchange.response().clone()) {
                    tracing::warn!(observation = %observation.id(), error = %e, "Response not attached");
                }
            }
            None => {
                tracing::debug!(observation = %observation.id(), "Client observation has no context");
            }
        }

        stop(&observation);
        input.clone()
    }

    fn supports(&self, filter_type: FilterType) -> bool {
        filter_type == FilterType::Response
    }
}
