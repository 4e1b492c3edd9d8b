//! Observation lifecycle errors.

use thiserror::Error;

use crate::observation::ObservationId;

/// Misuse of the observation lifecycle.
///
/// Instrumentation is fail-open: callers in the filter chain log these and
/// carry on with the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObservationError {
    #[error("observation {0} was already started")]
    AlreadyStarted(ObservationId),

    #[error("observation {0} was never started")]
    NotStarted(ObservationId),

    #[error("observation {0} was already stopped")]
    AlreadyStopped(ObservationId),

    #[error("observation {0} already has a parent")]
    ParentAlreadySet(ObservationId),

    #[error("response was already attached to the observation context")]
    ResponseAlreadySet,
}
