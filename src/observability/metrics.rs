//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record a timer and an in-flight gauge per observation
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `<name>` (histogram, seconds): final low-cardinality tags plus `error`
//! - `<name>.active` (gauge): in-flight observations, start-time tags
//!
//! For the gateway client observation `<name>` is `http.client.requests`,
//! exported as `http_client_requests`.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::Label;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observation::{KeyValues, Observation, ObservationHandler};

/// Value of the `error` tag when the observation recorded no error.
pub const NO_ERROR: &str = "none";

/// Initialize the Prometheus exporter with an HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

#[derive(Debug, Clone)]
struct ActiveSample {
    started: Instant,
    labels: Vec<Label>,
}

fn labels(kvs: &KeyValues) -> Vec<Label> {
    kvs.iter()
        .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
        .collect()
}

/// Records observations through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObservationHandler;

impl ObservationHandler for MetricsObservationHandler {
    fn on_start(&self, observation: &Observation) {
        let labels = labels(&observation.low_cardinality_key_values());
        metrics::gauge!(format!("{}.active", observation.name()), labels.clone()).increment(1.0);
        observation.insert_extension(ActiveSample {
            started: Instant::now(),
            labels,
        });
    }

    fn on_stop(&self, observation: &Observation) {
        let Some(sample) = observation.remove_extension::<ActiveSample>() else {
            return;
        };
        metrics::gauge!(format!("{}.active", observation.name()), sample.labels).decrement(1.0);

        let mut labels = labels(&observation.low_cardinality_key_values());
        let error = observation
            .error_message()
            .unwrap_or_else(|| NO_ERROR.to_string());
        labels.push(Label::new("error", error));
        metrics::histogram!(observation.name().to_string(), labels)
            .record(sample.started.elapsed().as_secs_f64());
    }
}
