//! Detecting Gateway: one listening port, many wire protocols
//!
//! This library implements a TCP gateway that identifies the protocol a
//! client speaks from the first bytes it sends, extracts routing parameters
//! (such as the virtual host) from the opening handshake, and relays the
//! connection to a matching backend. Every byte read during detection is
//! replayed to the backend first, so neither side can tell the gateway is
//! there.
//!
//! # Main Features
//!
//! - AMQP 1.0, MQTT, OpenWire, STOMP, HTTP/1.x and TLS detection
//! - Resumable, incremental handshake decoding over partial reads
//! - Virtual host aware backend routing
//! - Call detail records for every connection
//!
//! # Example
//!
//! ```no_run
//! use detecting_gateway::{Gateway, GatewayService, Result};
//! use detecting_gateway::config::{BackendConfig, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut config = GatewayConfig::default();
//!     config.backends.push(BackendConfig::from_arg("amqp://127.0.0.1:5672")?);
//!     config.validate()?;
//!
//!     let gateway = Gateway::from_config(&config)?;
//!     let service = GatewayService::bind(config.listen, gateway).await?;
//!     let (handle, task) = service.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     task.await.map_err(|e| detecting_gateway::GatewayError::Other(e.to_string()))??;
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod codec;
pub mod common;
pub mod config;
pub mod gateway;
pub mod protocol;
pub mod transport;

// Re-export commonly used structures and functions for convenience
pub use common::{parse_socket_addr, GatewayError, Result};
pub use gateway::{Gateway, GatewayHandle, GatewayService};
pub use protocol::{ConnectionParameters, MatchResult, Protocol, ProtocolDescriptor};
pub use transport::{Connection, MessageSocket};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
