//! Configuration merging functionality
//!
//! This module provides functionality for merging configurations from different sources.

use super::GatewayConfig;

/// Trait for merging configurations
pub trait ConfigMerger {
    /// Merge another configuration into this one
    ///
    /// Values from `other` will override values in `self` if they are not the default values.
    /// This is used to implement the configuration priority system.
    fn merge(&self, other: impl AsRef<Self>) -> Self where Self: Sized;
}

impl ConfigMerger for GatewayConfig {
    fn merge(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let default = Self::default();

        // Take the other value only where it differs from the default
        fn merge_field<T: Clone + PartialEq>(self_val: &T, other_val: &T, default_val: &T) -> T {
            if other_val != default_val {
                other_val.clone()
            } else {
                self_val.clone()
            }
        }

        Self {
            listen: merge_field(&self.listen, &other.listen, &default.listen),
            backends: merge_field(&self.backends, &other.backends, &default.backends),
            protocols: merge_field(&self.protocols, &other.protocols, &default.protocols),
            max_identification_length: merge_field(
                &self.max_identification_length,
                &other.max_identification_length,
                &default.max_identification_length,
            ),
            detection_timeout_ms: merge_field(
                &self.detection_timeout_ms,
                &other.detection_timeout_ms,
                &default.detection_timeout_ms,
            ),
            log_level: merge_field(&self.log_level, &other.log_level, &default.log_level),
            connect_timeout_ms: merge_field(
                &self.connect_timeout_ms,
                &other.connect_timeout_ms,
                &default.connect_timeout_ms,
            ),
            buffer_size: merge_field(&self.buffer_size, &other.buffer_size, &default.buffer_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ProtocolConfig};

    #[test]
    fn test_merge_keeps_non_default_values() {
        let mut base = GatewayConfig::default();
        base.buffer_size = 1024;
        base.backends = vec![BackendConfig::from_arg("mqtt://127.0.0.1:1883").unwrap()];

        let mut other = GatewayConfig::default();
        other.log_level = "debug".to_string();
        other.protocols = vec![ProtocolConfig::named("mqtt")];

        let merged = base.merge(&other);
        assert_eq!(merged.buffer_size, 1024);
        assert_eq!(merged.log_level, "debug");
        assert_eq!(merged.protocols, vec![ProtocolConfig::named("mqtt")]);
        assert_eq!(merged.backends.len(), 1);
    }
}
