//! Configuration validation.
//!
//! Serde handles the syntactic checks; this module covers the semantic
//! ones: value ranges and backend URL well-formedness. All violations
//! are collected and reported together, not just the first.

use std::fmt;

use url::Url;

use crate::config::schema::AppConfig;

/// A single semantic violation in the configuration.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.balancer.backends.is_empty() {
        errors.push(ValidationError {
            field: "balancer.backends".to_string(),
            message: "at least one backend is required".to_string(),
        });
    }

    for backend in &config.balancer.backends {
        if Url::parse(backend).is_err() {
            errors.push(ValidationError {
                field: "balancer.backends".to_string(),
                message: format!("not a valid URL: {backend}"),
            });
        }
    }

    if config.balancer.max_retries == 0 {
        errors.push(ValidationError {
            field: "balancer.max_retries".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError {
            field: "listener.max_connections".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError {
            field: "health_check.interval_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    if config.health_check.enabled && config.health_check.timeout_secs == 0 {
        errors.push(ValidationError {
            field: "health_check.timeout_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    if config.rate_limit.enabled {
        if config.rate_limit.default_capacity <= 0 {
            errors.push(ValidationError {
                field: "rate_limit.default_capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if config.rate_limit.default_rate <= 0 {
            errors.push(ValidationError {
                field: "rate_limit.default_rate".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError {
            field: "timeouts.request_secs".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
