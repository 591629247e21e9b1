//! Configuration validator
//!
//! This module provides functionality for validating configuration.

use std::collections::HashSet;

use log::warn;

use crate::config::error::{ConfigError, Result};
use crate::config::GatewayConfig;
use crate::protocol::ProtocolDescriptor;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Validate the configuration
pub fn validate_config(config: &GatewayConfig) -> Result<()> {
    let descriptors = validate_protocol_settings(config)?;

    validate_backend_settings(config, &descriptors)?;

    validate_general_settings(config)?;

    Ok(())
}

/// Validate the enabled protocol list
fn validate_protocol_settings(config: &GatewayConfig) -> Result<Vec<ProtocolDescriptor>> {
    if config.protocols.is_empty() {
        return Err(ConfigError::InvalidValue(
            "protocols".to_string(),
            "At least one protocol must be enabled".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(config.protocols.len());
    for protocol in &config.protocols {
        if protocol.max_frame_size == Some(0) {
            return Err(ConfigError::InvalidValue(
                format!("protocols.{}.max_frame_size", protocol.name),
                "Maximum frame size must be greater than 0".to_string(),
            ));
        }

        let descriptor = protocol.descriptor()?;
        // "ssl" and "tls" name the same protocol
        if !seen.insert(descriptor.name()) {
            return Err(ConfigError::InvalidCombination(format!(
                "Protocol '{}' is enabled more than once",
                descriptor.name()
            )));
        }
        descriptors.push(descriptor);
    }

    if config.max_identification_length == 0 {
        return Err(ConfigError::InvalidValue(
            "max_identification_length".to_string(),
            "Identification ceiling must be greater than 0".to_string(),
        ));
    }

    Ok(descriptors)
}

/// Every backend must parse and be reachable through an enabled protocol
fn validate_backend_settings(config: &GatewayConfig, descriptors: &[ProtocolDescriptor]) -> Result<()> {
    for backend in &config.backends {
        let (scheme, _) = backend.split_uri()?;

        if !descriptors.iter().any(|d| d.handles_scheme(&scheme)) {
            return Err(ConfigError::InvalidCombination(format!(
                "Backend {} uses scheme '{}' which no enabled protocol handles",
                backend.uri, scheme
            )));
        }

        if backend.virtual_host.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::InvalidValue(
                "backends".to_string(),
                format!("{}: virtual host must not be empty", backend.uri),
            ));
        }
    }

    Ok(())
}

/// Validate general settings
fn validate_general_settings(config: &GatewayConfig) -> Result<()> {
    // Validate log level
    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        warn!("Invalid log level: {}. Using default: info", config.log_level);
    }

    // Validate buffer size
    if config.buffer_size == 0 {
        return Err(ConfigError::InvalidValue(
            "buffer_size".to_string(),
            "Buffer size must be greater than 0".to_string(),
        ));
    }

    // Validate connect timeout
    if config.connect_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue(
            "connect_timeout_ms".to_string(),
            "Connect timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

/// Configuration validator trait
pub trait ConfigValidator {
    /// Check configuration for warnings
    fn check_warnings(&self) -> Vec<String>;
}

impl ConfigValidator for GatewayConfig {
    fn check_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        // Check log level
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            warnings.push(format!("Invalid log level '{}', using default 'info'", self.log_level));
        }

        // A protocol that needs more bytes than the ceiling can never match
        for protocol in &self.protocols {
            if let Ok(descriptor) = protocol.descriptor() {
                if descriptor.max_identification_length() > self.max_identification_length {
                    warnings.push(format!(
                        "Protocol '{}' needs up to {} bytes to identify but the ceiling is {}",
                        descriptor.name(),
                        descriptor.max_identification_length(),
                        self.max_identification_length
                    ));
                }
            }
        }

        if self.backends.is_empty() {
            warnings.push("No backends configured, every connection will be rejected".to_string());
        }

        if self.detection_timeout().is_none() {
            warnings.push("Detection timeout disabled, silent clients hold connections open".to_string());
        }

        warnings
    }
}

/// Check configuration for warnings (standalone function for convenience)
pub fn check_warnings(config: &GatewayConfig) -> Vec<String> {
    ConfigValidator::check_warnings(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ProtocolConfig};

    fn config_with_backend(uri: &str) -> GatewayConfig {
        GatewayConfig {
            backends: vec![BackendConfig::from_arg(uri).unwrap()],
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config_with_backend("amqp://127.0.0.1:5672@vh")).is_ok());
        assert!(validate_config(&config_with_backend("ssl://127.0.0.1:443")).is_ok());
    }

    #[test]
    fn test_rejects_empty_and_duplicate_protocols() {
        let mut config = GatewayConfig::default();
        config.protocols.clear();
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidValue(..))));

        config.protocols = vec![ProtocolConfig::named("tls"), ProtocolConfig::named("SSL")];
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidCombination(_))));

        config.protocols = vec![ProtocolConfig::named("gopher")];
        assert!(matches!(validate_config(&config), Err(ConfigError::UnknownProtocol(_))));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = GatewayConfig::default();
        config.buffer_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = GatewayConfig::default();
        config.max_identification_length = 0;
        assert!(validate_config(&config).is_err());

        let mut config = GatewayConfig::default();
        config.connect_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = GatewayConfig::default();
        config.protocols[0].max_frame_size = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_unhandled_backend_scheme() {
        let mut config = config_with_backend("mqtt://127.0.0.1:1883");
        config.protocols = vec![ProtocolConfig::named("amqp")];
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidCombination(_))));

        let config = config_with_backend("gopher://127.0.0.1:70");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_warnings() {
        let mut config = GatewayConfig::default();
        config.log_level = "loud".to_string();
        config.max_identification_length = 4;
        config.detection_timeout_ms = 0;

        let warnings = check_warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("log level")));
        assert!(warnings.iter().any(|w| w.contains("'amqp'")));
        assert!(warnings.iter().any(|w| w.contains("No backends")));
        assert!(warnings.iter().any(|w| w.contains("Detection timeout")));

        // Invalid log level is only a warning
        assert!(validate_config(&config).is_ok());

        let warnings = config_with_backend("amqp://127.0.0.1:5672").check_warnings();
        assert!(warnings.is_empty());
    }
}
