//! Gateway observation library.
//!
//! Creates exactly one observation per proxied request, links it to a parent
//! observation found on the exchange, and derives its name and tags through
//! a pluggable convention once the response is known.

pub mod config;
pub mod exchange;
pub mod filter;
pub mod http;
pub mod observability;
pub mod observation;

pub use config::GatewayObservationConfig;
pub use exchange::{Exchange, RequestInfo, ResponseInfo};
pub use filter::{HttpHeadersFilter, ObservedRequestHttpHeadersFilter, ObservedResponseHttpHeadersFilter};
pub use http::HttpServer;
pub use observation::{Observation, ObservationRegistry};
