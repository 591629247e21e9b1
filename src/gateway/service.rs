//! Gateway service implementation
//!
//! The service owns the listener and one task per connection. A single loop
//! multiplexes accepted sockets, control messages and finished tasks, so no
//! state is shared behind locks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use socket2::SockRef;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use super::forwarder::RelayStats;
use super::handler::Gateway;
use super::message::{create_channel, GatewayHandle, GatewayMessage};
use crate::common::{GatewayError, Result};
use crate::transport::Connection;

/// Default time running connections get to finish after a shutdown request
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Listener plus connection tasks
pub struct GatewayService {
    listener: TcpListener,
    local_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown_grace: Duration,
}

impl GatewayService {
    /// Bind the listening socket
    ///
    /// # Parameters
    ///
    /// * `listen_addr` - Listen address; port 0 picks a free port
    /// * `gateway` - Per-connection pipeline
    pub async fn bind(listen_addr: SocketAddr, gateway: Gateway) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await.map_err(GatewayError::Io)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            gateway: Arc::new(gateway),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// Address actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the service in the background
    ///
    /// # Returns
    ///
    /// The control handle, and the task that completes once the service has
    /// shut down
    pub fn start(self) -> (GatewayHandle, JoinHandle<Result<()>>) {
        let (handle, rx) = create_channel();

        let task = tokio::spawn(async move {
            let result = self.run_service(rx).await;
            if let Err(e) = &result {
                error!("Gateway service error: {}", e);
            }
            result
        });

        (handle, task)
    }

    async fn run_service(self, mut rx: mpsc::Receiver<GatewayMessage>) -> Result<()> {
        info!("Gateway listening on {}", self.local_addr);

        let mut tasks: JoinSet<Result<RelayStats>> = JoinSet::new();

        loop {
            select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((client_stream, client_addr)) => {
                            debug!("New connection from {}", client_addr);
                            if let Err(e) = SockRef::from(&client_stream).set_keepalive(true) {
                                debug!("Failed to enable keepalive for {}: {}", client_addr, e);
                            }
                            self.spawn_connection(&mut tasks, client_stream);
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                        }
                    }
                }

                Some(message) = rx.recv() => {
                    match message {
                        GatewayMessage::HandleConnection { connection } => {
                            debug!("Connection handed over from {:?}", connection.peer_addr().ok());
                            self.spawn_connection(&mut tasks, connection);
                        }
                        GatewayMessage::ActiveConnections(reply) => {
                            let _ = reply.send(tasks.len());
                        }
                        GatewayMessage::Shutdown => {
                            info!("Received shutdown message");
                            break;
                        }
                    }
                }

                Some(result) = tasks.join_next() => {
                    log_task_result(result);
                }
            }
        }

        // Stop accepting before draining
        drop(self.listener);

        info!("Waiting for {} connections to complete...", tasks.len());
        let drain = async {
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        };
        if timeout(self.shutdown_grace, drain).await.is_err() {
            warn!("Shutdown timeout reached, aborting {} connections", tasks.len());
            tasks.abort_all();
        }

        info!("Gateway service shutdown complete");
        Ok(())
    }

    fn spawn_connection<C: Connection>(&self, tasks: &mut JoinSet<Result<RelayStats>>, connection: C) {
        let gateway = Arc::clone(&self.gateway);
        tasks.spawn(async move { gateway.handle_connection(connection).await });
    }
}

fn log_task_result(result: std::result::Result<Result<RelayStats>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(stats)) => debug!(
            "Connection finished: {} bytes to backend, {} bytes to client",
            stats.client_to_backend, stats.backend_to_client
        ),
        Ok(Err(e @ GatewayError::ConnectionClosed { .. })) => debug!("{}", e),
        Ok(Err(e)) => warn!("Connection failed: {}", e),
        Err(e) if e.is_cancelled() => debug!("Connection task cancelled"),
        Err(e) => error!("Task error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::balancer::{Backend, StaticBackends};
    use crate::gateway::detector::Detector;
    use crate::gateway::telemetry::LogSink;
    use crate::protocol::default_descriptors;
    use crate::transport::tests::create_tcp_pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn service(backend: SocketAddr) -> GatewayService {
        let descriptors: Arc<[_]> = default_descriptors().into();
        let selector = StaticBackends::new(descriptors.clone(), vec![Backend::new("stomp", backend, None)]);
        let gateway = Gateway::new(Detector::new(descriptors, 64), Arc::new(selector), Arc::new(LogSink));
        GatewayService::bind("127.0.0.1:0".parse().unwrap(), gateway)
            .await
            .unwrap()
            .with_shutdown_grace(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_accept_and_shutdown() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let service = service(backend.local_addr().unwrap()).await;
        let addr = service.local_addr();
        assert_ne!(addr.port(), 0);

        let (handle, task) = service.start();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"STOMP\nhost:a\n\n\0").await.unwrap();

        let (mut upstream, _) = backend.accept().await.unwrap();
        let mut prefix = vec![0u8; 15];
        upstream.read_exact(&mut prefix).await.unwrap();
        assert_eq!(&prefix, b"STOMP\nhost:a\n\n\0");
        assert_eq!(handle.active_connections().await.unwrap(), 1);

        handle.shutdown().await.unwrap();
        // The relay is still open; the grace period ends it
        task.await.unwrap().unwrap();
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_handed_over_connection() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let service = service(backend.local_addr().unwrap()).await;
        let (handle, task) = service.start();

        let (mut client, server) = create_tcp_pair().await;
        handle.handle_connection(server).await.unwrap();
        client.write_all(b"CONNECT\n\n\0").await.unwrap();
        client.shutdown().await.unwrap();

        let (mut upstream, _) = backend.accept().await.unwrap();
        let mut received = Vec::new();
        upstream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"CONNECT\n\n\0");
        drop(upstream);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
