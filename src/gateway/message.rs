//! Gateway control messages
//!
//! The running service is controlled through [`GatewayHandle`], which only
//! holds the sending side of a channel; the service loop owns all state.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::common::{GatewayError, Result};
use crate::transport::Connection;

/// Messages that can be sent to the gateway service
pub enum GatewayMessage {
    /// Run an already established connection through the gateway, e.g. a
    /// WebSocket upgraded by an embedding server
    HandleConnection {
        connection: Box<dyn Connection>,
    },
    /// Report the number of connection tasks still running
    ActiveConnections(oneshot::Sender<usize>),
    /// Stop accepting and drain running connections
    Shutdown,
}

impl fmt::Debug for GatewayMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandleConnection { connection } => f
                .debug_struct("HandleConnection")
                .field("peer_addr", &connection.peer_addr().ok())
                .finish(),
            Self::ActiveConnections(_) => write!(f, "ActiveConnections"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Gateway control handle
///
/// Cheap to clone; every clone talks to the same service.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayMessage>,
}

impl GatewayHandle {
    pub(crate) fn new(sender: mpsc::Sender<GatewayMessage>) -> Self {
        Self { sender }
    }

    /// Send a message to the gateway service
    ///
    /// # Returns
    ///
    /// Fails once the service has stopped
    pub async fn send(&self, message: GatewayMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| GatewayError::Other("Gateway service is not running".to_string()))
    }

    /// Hand a connection accepted elsewhere to the gateway
    pub async fn handle_connection<C: Connection>(&self, connection: C) -> Result<()> {
        self.send(GatewayMessage::HandleConnection {
            connection: Box::new(connection),
        })
        .await
    }

    /// Number of connections currently being detected or relayed
    pub async fn active_connections(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayMessage::ActiveConnections(tx)).await?;
        rx.await
            .map_err(|_| GatewayError::Other("Gateway service stopped before replying".to_string()))
    }

    /// Shutdown the gateway service
    pub async fn shutdown(&self) -> Result<()> {
        self.send(GatewayMessage::Shutdown).await
    }
}

/// Create a new gateway message channel
pub fn create_channel() -> (GatewayHandle, mpsc::Receiver<GatewayMessage>) {
    let (tx, rx) = mpsc::channel(100);
    (GatewayHandle::new(tx), rx)
}
