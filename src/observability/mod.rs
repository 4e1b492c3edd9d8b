//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Observation start/stop
//!     → propagation.rs (trace context, header injection during start)
//!     → metrics.rs (timer + in-flight gauge)
//!     → tracing.rs (spans nested by parent observation)
//!
//! Consumers:
//!     → Log aggregation (logging.rs, stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Upstream services (injected trace headers)
//! ```
//!
//! # Design Decisions
//! - Handlers are registered on an explicit `ObservationRegistry`
//! - Propagation runs first so later handlers see the trace context

pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod tracing;

use std::sync::Arc;

use crate::config::GatewayObservationConfig;
use crate::observation::ObservationRegistry;

use self::metrics::MetricsObservationHandler;
use self::propagation::{propagator_for, PropagatingSenderHandler};
use self::tracing::TracingObservationHandler;

/// Build a registry with the handlers the configuration enables.
pub fn registry_from_config(config: &GatewayObservationConfig) -> ObservationRegistry {
    let mut registry = ObservationRegistry::new();
    if config.tracing.enabled {
        registry = registry
            .with_handler(Arc::new(PropagatingSenderHandler::new(propagator_for(
                config.tracing.propagation,
            ))))
            .with_handler(Arc::new(TracingObservationHandler));
    }
    if config.metrics.enabled {
        registry = registry.with_handler(Arc::new(MetricsObservationHandler));
    }
    registry
}
