//! Network utility functions

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use log::debug;

use super::error::{GatewayError, Result};

/// Parse a socket address
///
/// Literal `ip:port` forms are parsed directly, anything else goes through
/// name resolution and the first address wins.
///
/// # Arguments
///
/// * `addr` - The address string to parse
///
/// # Returns
///
/// The parsed `SocketAddr`
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    match addr.to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(resolved) = addrs.next() {
                debug!("Resolved {} to {}", addr, resolved);
                Ok(resolved)
            } else {
                Err(GatewayError::Config(format!("Failed to parse address: {}", addr)))
            }
        }
        Err(e) => Err(GatewayError::Config(format!("Failed to parse address {}: {}", addr, e))),
    }
}
