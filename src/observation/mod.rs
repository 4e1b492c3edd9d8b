//! Observation subsystem.
//!
//! # Data Flow
//! ```text
//! request filter
//!     → context.rs (carrier + request, response absent)
//!     → catalog.rs (documented kind picks custom or default convention)
//!     → handle.rs (NOT_STARTED → STARTED, handlers run, headers injected)
//!
//! response filter
//!     → context.rs (response attached once)
//!     → handle.rs (STARTED → STOPPED)
//!     → convention.rs (tags derived from the now complete context)
//!     → registry.rs handlers (metrics, spans)
//! ```
//!
//! # Design Decisions
//! - Registry and conventions are passed in, never global
//! - Tags are evaluated lazily at stop time

pub mod catalog;
pub mod context;
pub mod convention;
pub mod error;
pub mod handle;
pub mod key_value;
pub mod registry;

pub use catalog::{DocumentedObservation, LowCardinalityKey, GATEWAY_HTTP_CLIENT_OBSERVATION};
pub use context::GatewayContext;
pub use convention::{DefaultGatewayObservationConvention, GatewayObservationConvention};
pub use error::ObservationError;
pub use handle::{Observation, ObservationId, ObservationState};
pub use key_value::{KeyName, KeyValue, KeyValues};
pub use registry::{ObservationHandler, ObservationRegistry};
