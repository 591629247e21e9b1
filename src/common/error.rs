//! Error handling module
//!
//! This module defines the error types and result type aliases used in the gateway.
//! Every variant describes the failure of a single connection or of startup;
//! the service logs connection failures and keeps accepting.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::codec::DecodeError;

/// Detecting gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Every candidate protocol rejected the prefix, or the identification ceiling was reached
    #[error("No protocol matched the first {buffered} bytes")]
    NoProtocolMatched { buffered: usize },

    /// A protocol matched but its handshake could not be decoded
    #[error("Malformed {protocol} handshake: {source}")]
    MalformedHandshake {
        protocol: &'static str,
        source: DecodeError,
    },

    /// The selector had no backend for the connection
    #[error("No backend available for {protocol} (virtual host: {virtual_host:?})")]
    BackendUnavailable {
        protocol: &'static str,
        virtual_host: Option<String>,
    },

    /// The client closed before detection finished
    #[error("Connection closed after {buffered} bytes, before detection completed")]
    ConnectionClosed { buffered: usize },

    /// Detection did not finish in time
    #[error("Detection timed out after {0:?}")]
    DetectionTimeout(Duration),

    /// Backend connect did not finish in time
    #[error("Connecting to backend {backend} timed out after {timeout:?}")]
    BackendConnectTimeout { backend: SocketAddr, timeout: Duration },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Short label for telemetry
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::NoProtocolMatched { .. } => "no_protocol_matched",
            Self::MalformedHandshake { .. } => "malformed_handshake",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::DetectionTimeout(_) => "detection_timeout",
            Self::BackendConnectTimeout { .. } => "backend_connect_timeout",
            Self::Config(_) => "config",
            Self::Other(_) => "other",
        }
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let gateway_err: GatewayError = io_err.into();

        assert!(matches!(gateway_err, GatewayError::Io(_)), "Should convert to IO error");
        assert_eq!(gateway_err.kind(), "io");
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::Config("Invalid configuration".to_string());
        assert!(err.to_string().contains("Invalid configuration"));

        let err = GatewayError::NoProtocolMatched { buffered: 64 };
        assert_eq!(err.to_string(), "No protocol matched the first 64 bytes");
    }

    #[test]
    fn test_malformed_keeps_source() {
        let err = GatewayError::MalformedHandshake {
            protocol: "amqp",
            source: DecodeError::FrameTooSmall { size: 4, min: 8 },
        };
        assert!(err.to_string().starts_with("Malformed amqp handshake"));
        assert!(err.source().is_some());
    }
}
