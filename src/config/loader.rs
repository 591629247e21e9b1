//! Configuration loading functionality
//!
//! This module provides functionality for loading configuration from different sources
//! such as files and environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};

use super::defaults::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
use super::error::{ConfigError, Result};
use super::merger::ConfigMerger;
use super::{BackendConfig, GatewayConfig, ProtocolConfig};
use crate::common::parse_socket_addr;

/// Trait for loading configuration from different sources
pub trait ConfigLoader {
    /// Load configuration from a JSON file
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> where Self: Sized;

    /// Load configuration from environment variables
    fn from_env() -> Result<Self> where Self: Sized;

    /// Defaults, then the file (if given, or `config.json` if present), then
    /// the environment (if requested)
    fn load(path: Option<&Path>, use_env: bool) -> Result<Self> where Self: Sized;
}

impl ConfigLoader for GatewayConfig {
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(path.to_path_buf(), e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| {
            ConfigError::ParseError(format!("Failed to parse JSON config file {}: {}", path.display(), e))
        })
    }

    fn from_env() -> Result<Self> {
        let get_env = |name: &str| -> Option<String> {
            env::var(format!("{}{}", ENV_PREFIX, name)).ok()
        };

        // Helper to parse a numeric or address variable into a field
        fn update_field<T: FromStr>(
            get_env: &impl Fn(&str) -> Option<String>,
            env_name: &str,
            field: &mut T,
        ) -> Result<()>
        where
            T::Err: std::fmt::Display,
        {
            if let Some(value) = get_env(env_name) {
                *field = value.trim().parse().map_err(|e: T::Err| {
                    ConfigError::InvalidValue(format!("{}{}", ENV_PREFIX, env_name), e.to_string())
                })?;
            }
            Ok(())
        }

        let mut config = Self::default();

        if let Some(value) = get_env("LISTEN") {
            config.listen = parse_socket_addr(&value)
                .map_err(|e| ConfigError::InvalidValue(format!("{}LISTEN", ENV_PREFIX), e.to_string()))?;
        }
        if let Some(value) = get_env("LOG_LEVEL") {
            config.log_level = value;
        }

        update_field(&get_env, "MAX_IDENTIFICATION_LENGTH", &mut config.max_identification_length)?;
        update_field(&get_env, "DETECTION_TIMEOUT_MS", &mut config.detection_timeout_ms)?;
        update_field(&get_env, "CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms)?;
        update_field(&get_env, "BUFFER_SIZE", &mut config.buffer_size)?;

        // Comma separated lists
        if let Some(value) = get_env("PROTOCOLS") {
            config.protocols = split_list(&value).map(ProtocolConfig::named).collect();
        }
        if let Some(value) = get_env("BACKENDS") {
            config.backends = split_list(&value)
                .map(BackendConfig::from_arg)
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(config)
    }

    fn load(path: Option<&Path>, use_env: bool) -> Result<Self> {
        let mut config = Self::default();
        debug!("Starting with default configuration");

        match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                config = config.merge(Self::from_file(path)?);
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!("Loading configuration from {}", DEFAULT_CONFIG_FILE);
                config = config.merge(Self::from_file(DEFAULT_CONFIG_FILE)?);
            }
            None => debug!("No configuration file"),
        }

        if use_env {
            info!("Applying configuration from environment variables");
            config = config.merge(Self::from_env()?);
        }

        Ok(config)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
