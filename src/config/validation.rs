//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, upstream URL and timeouts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: GatewayObservationConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayObservationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid server bind address '{0}'")]
    BindAddress(String),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("invalid upstream URL '{0}'")]
    Upstream(String),

    #[error("unsupported upstream scheme '{0}', only http is forwarded")]
    UpstreamScheme(String),

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayObservationConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(config.metrics.address.clone()));
    }

    match Url::parse(&config.server.upstream) {
        Ok(url) if url.scheme() != "http" => {
            errors.push(ValidationError::UpstreamScheme(url.scheme().to_string()));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::Upstream(config.server.upstream.clone())),
    }

    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayObservationConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = GatewayObservationConfig::default();
        config.server.bind_address = "not-an-address".into();
        config.server.upstream = "https://secure.example".into();
        config.server.request_timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::BindAddress("not-an-address".into()),
                ValidationError::UpstreamScheme("https".into()),
                ValidationError::ZeroTimeout,
            ]
        );
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = GatewayObservationConfig::default();
        config.metrics.address = "nope".into();
        assert!(validate_config(&config).is_err());

        config.metrics.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
