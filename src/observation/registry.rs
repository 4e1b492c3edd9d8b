//! Observation registry and lifecycle handlers.

use std::fmt;
use std::sync::Arc;

use crate::observation::Observation;

/// Receives observation lifecycle events.
///
/// Handlers run synchronously on the caller's task, in registration order on
/// start and in reverse order on stop. They must not block.
pub trait ObservationHandler: Send + Sync {
    fn on_start(&self, observation: &Observation);

    fn on_stop(&self, observation: &Observation);

    fn on_error(&self, _observation: &Observation) {}
}

/// Set of handlers observations report to.
///
/// Cheap to clone; passed explicitly to whatever creates observations.
#[derive(Clone, Default)]
pub struct ObservationRegistry {
    handlers: Arc<Vec<Arc<dyn ObservationHandler>>>,
}

impl ObservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry without handlers. Observations still track their state.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Register a handler after the existing ones.
    pub fn with_handler(mut self, handler: Arc<dyn ObservationHandler>) -> Self {
        Arc::make_mut(&mut self.handlers).push(handler);
        self
    }

    pub fn is_noop(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn handlers(&self) -> &[Arc<dyn ObservationHandler>] {
        &self.handlers
    }
}

impl fmt::Debug for ObservationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
