//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, delays ordered)
//! - Detect duplicate provider ids
//! - Refuse an admin API without a key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("resilience.{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("resilience.base_delay_ms ({base_ms}) exceeds max_delay_ms ({max_ms})")]
    DelayOrder { base_ms: u64, max_ms: u64 },

    #[error("provider at index {0} has an empty id")]
    EmptyProviderId(usize),

    #[error("provider id '{0}' is declared more than once")]
    DuplicateProvider(String),

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,

    #[error("{field} is not a socket address: '{value}'")]
    BadAddress { field: &'static str, value: String },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let resilience = &config.resilience;

    if resilience.max_attempts_per_provider == 0 {
        errors.push(ValidationError::Zero { field: "max_attempts_per_provider" });
    }
    if resilience.failure_threshold == 0 {
        errors.push(ValidationError::Zero { field: "failure_threshold" });
    }
    if resilience.base_delay_ms > resilience.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base_ms: resilience.base_delay_ms,
            max_ms: resilience.max_delay_ms,
        });
    }

    let mut seen = HashSet::new();
    for (index, provider) in config.providers.iter().enumerate() {
        if provider.id.trim().is_empty() {
            errors.push(ValidationError::EmptyProviderId(index));
        } else if !seen.insert(provider.id.as_str()) {
            errors.push(ValidationError::DuplicateProvider(provider.id.clone()));
        }
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingAdminKey);
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::BadAddress {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::BadAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
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
    use crate::resilience::ProviderDescriptor;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn test_duplicate_and_empty_providers() {
        let mut config = GatewayConfig::default();
        config.providers = vec![
            ProviderDescriptor::new("github", 0),
            ProviderDescriptor::new(" ", 1),
            ProviderDescriptor::new("github", 2),
        ];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyProviderId(1),
                ValidationError::DuplicateProvider("github".into()),
            ]
        );
    }

    #[test]
    fn test_admin_fails_closed() {
        let mut config = GatewayConfig::default();
        config.admin.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::MissingAdminKey]);

        config.admin.api_key = "secret".into();
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_zero_values() {
        let mut config = GatewayConfig::default();
        config.resilience.max_attempts_per_provider = 0;
        config.resilience.failure_threshold = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
