//! Span creation for observations.
//!
//! # Responsibilities
//! - Open a `tracing` span when an observation starts
//! - Nest it under the parent observation's span
//! - Record the contextual name and final tags on stop

use tracing::field::Empty;
use tracing::Span;

use crate::observation::{Observation, ObservationHandler};

#[derive(Debug, Clone)]
struct ObservationSpan(Span);

fn open_span(observation: &Observation, parent: Option<tracing::Id>) -> Span {
    match parent {
        Some(parent) => tracing::info_span!(
            parent: parent,
            "gateway.observation",
            otel.name = %observation.name(),
            observation = %observation.id(),
            method = Empty,
            uri = Empty,
            status = Empty,
            error = Empty,
        ),
        None => tracing::info_span!(
            "gateway.observation",
            otel.name = %observation.name(),
            observation = %observation.id(),
            method = Empty,
            uri = Empty,
            status = Empty,
            error = Empty,
        ),
    }
}

/// Maps observations onto `tracing` spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObservationHandler;

impl ObservationHandler for TracingObservationHandler {
    fn on_start(&self, observation: &Observation) {
        let parent = observation
            .parent()
            .and_then(|p| p.extension::<ObservationSpan>())
            .and_then(|s| s.0.id());
        let span = open_span(observation, parent);
        observation.insert_extension(ObservationSpan(span));
    }

    fn on_stop(&self, observation: &Observation) {
        let Some(ObservationSpan(span)) = observation.remove_extension::<ObservationSpan>() else {
            return;
        };
        if let Some(name) = observation.contextual_name() {
            span.record("otel.name", name.as_str());
        }
        let tags = observation.low_cardinality_key_values();
        for (key, value) in tags.iter() {
            span.record(key, value);
        }
        if let Some(error) = observation.error_message() {
            span.record("error", error.as_str());
        }
        tracing::debug!(parent: &span, tags = %tags, "Observation stopped");
    }
}
