//! The observation handle and its lifecycle state machine.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use axum::http::Extensions;

use crate::observation::convention::GatewayObservationConvention;
use crate::observation::{GatewayContext, KeyValues, ObservationError, ObservationRegistry};

/// Global counter for observation IDs. Only uniqueness is needed.
static OBSERVATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique observation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationId(u64);

impl ObservationId {
    fn next() -> Self {
        Self(OBSERVATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// Lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationState {
    NotStarted = 0,
    Started = 1,
    Stopped = 2,
}

impl From<u8> for ObservationState {
    fn from(val: u8) -> Self {
        match val {
            0 => ObservationState::NotStarted,
            1 => ObservationState::Started,
            _ => ObservationState::Stopped,
        }
    }
}

struct Inner {
    id: ObservationId,
    name: String,
    state: AtomicU8,
    parent: OnceLock<Observation>,
    context: Option<Arc<GatewayContext>>,
    convention: Option<Arc<dyn GatewayObservationConvention>>,
    registry: ObservationRegistry,
    error: Mutex<Option<String>>,
    extensions: Mutex<Extensions>,
}

/// One unit of instrumentation. Cloning yields another handle to the same
/// observation.
///
/// Starts exactly once and stops exactly once; every other transition is
/// rejected with an [`ObservationError`].
#[derive(Clone)]
pub struct Observation {
    inner: Arc<Inner>,
}

impl Observation {
    fn build(
        name: String,
        context: Option<Arc<GatewayContext>>,
        convention: Option<Arc<dyn GatewayObservationConvention>>,
        registry: &ObservationRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ObservationId::next(),
                name,
                state: AtomicU8::new(ObservationState::NotStarted as u8),
                parent: OnceLock::new(),
                context,
                convention,
                registry: registry.clone(),
                error: Mutex::new(None),
                extensions: Mutex::new(Extensions::new()),
            }),
        }
    }

    /// A plain observation without context or convention, e.g. the inbound
    /// server observation a host uses as parent.
    pub fn create_not_started(name: impl Into<String>, registry: &ObservationRegistry) -> Self {
        Self::build(name.into(), None, None, registry)
    }

    /// An observation whose name and tags come from `convention` applied to
    /// `context`.
    pub fn for_context(
        convention: Arc<dyn GatewayObservationConvention>,
        context: Arc<GatewayContext>,
        registry: &ObservationRegistry,
    ) -> Self {
        let name = convention.name().to_string();
        Self::build(name, Some(context), Some(convention), registry)
    }

    pub fn id(&self) -> ObservationId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ObservationState {
        ObservationState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn context(&self) -> Option<&Arc<GatewayContext>> {
        self.inner.context.as_ref()
    }

    pub fn parent(&self) -> Option<&Observation> {
        self.inner.parent.get()
    }

    /// True when both handles refer to the same observation.
    pub fn ptr_eq(&self, other: &Observation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Link a parent. Allowed once, before `start`.
    pub fn set_parent(&self, parent: &Observation) -> Result<(), ObservationError> {
        if self.state() != ObservationState::NotStarted {
            return Err(ObservationError::AlreadyStarted(self.id()));
        }
        self.inner
            .parent
            .set(parent.clone())
            .map_err(|_| ObservationError::ParentAlreadySet(self.id()))
    }

    /// Transition to `Started` and notify handlers.
    pub fn start(&self) -> Result<(), ObservationError> {
        self.transition(ObservationState::NotStarted, ObservationState::Started)?;
        for handler in self.inner.registry.handlers() {
            handler.on_start(self);
        }
        Ok(())
    }

    /// Transition to `Stopped` and notify handlers; tags are evaluated by
    /// the handlers at this point.
    pub fn stop(&self) -> Result<(), ObservationError> {
        self.transition(ObservationState::Started, ObservationState::Stopped)?;
        for handler in self.inner.registry.handlers().iter().rev() {
            handler.on_stop(self);
        }
        Ok(())
    }

    /// Record an error against this observation.
    pub fn error(&self, message: impl Into<String>) {
        *self.inner.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
        for handler in self.inner.registry.handlers() {
            handler.on_error(self);
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contextual_name(&self) -> Option<String> {
        match (&self.inner.convention, &self.inner.context) {
            (Some(convention), Some(context)) => convention.contextual_name(context),
            _ => None,
        }
    }

    pub fn low_cardinality_key_values(&self) -> KeyValues {
        match (&self.inner.convention, &self.inner.context) {
            (Some(convention), Some(context)) => convention.low_cardinality_key_values(context),
            _ => KeyValues::empty(),
        }
    }

    pub fn high_cardinality_key_values(&self) -> KeyValues {
        match (&self.inner.convention, &self.inner.context) {
            (Some(convention), Some(context)) => convention.high_cardinality_key_values(context),
            _ => KeyValues::empty(),
        }
    }

    /// Attach handler state to this observation.
    pub fn insert_extension<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.extensions().insert(value);
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions().get::<T>().cloned()
    }

    pub fn remove_extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions().remove::<T>()
    }

    fn extensions(&self) -> std::sync::MutexGuard<'_, Extensions> {
        self.inner
            .extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        from: ObservationState,
        to: ObservationState,
    ) -> Result<(), ObservationError> {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| match ObservationState::from(actual) {
                ObservationState::NotStarted => ObservationError::NotStarted(self.id()),
                ObservationState::Started => ObservationError::AlreadyStarted(self.id()),
                ObservationState::Stopped => ObservationError::AlreadyStopped(self.id()),
            })
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("parent", &self.parent().map(Observation::id))
            .finish()
    }
}
