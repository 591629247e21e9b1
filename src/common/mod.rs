//! Common module
//!
//! This module contains the error type, logger setup and address helpers used throughout the gateway.

pub mod error;
pub mod log;
pub mod net;

// Re-export commonly used types and functions
pub use self::error::{GatewayError, Result};
pub use self::log::init_logger;
pub use self::net::parse_socket_addr;
