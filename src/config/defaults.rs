//! Default configuration values
//!
//! Single source of truth for defaults, used by serde and by the loaders.

use std::net::{Ipv4Addr, SocketAddr};

use crate::protocol::PROTOCOL_NAMES;

use super::ProtocolConfig;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "DETECTING_GATEWAY_";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default listen port
pub const LISTEN_PORT: u16 = 8000;

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default listen address
pub fn listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, LISTEN_PORT))
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default global identification ceiling in bytes
pub fn max_identification_length() -> usize {
    64
}

/// Default detection timeout in milliseconds
pub fn detection_timeout_ms() -> u64 {
    5000
}

/// Default backend connect timeout in milliseconds
pub fn connect_timeout_ms() -> u64 {
    5000
}

/// Default buffer size (8KB)
pub fn buffer_size() -> usize {
    8192
}

/// Every supported protocol in default priority order
pub fn protocols() -> Vec<ProtocolConfig> {
    PROTOCOL_NAMES.iter().map(|name| ProtocolConfig::named(name)).collect()
}
