//! Connection handler module
//!
//! This module handles individual client connections: detect, select a
//! backend, connect, replay and relay, then report a call detail record.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::balancer::{BackendSelector, StaticBackends};
use super::detector::Detector;
use super::forwarder::{proxy_data, RelayStats};
use super::telemetry::{CallDetailRecord, CallDetailSink, CompositeSink, LogSink, MetricsSink};
use crate::common::{GatewayError, Result};
use crate::config::GatewayConfig;
use crate::transport::Connection;

/// Everything a connection task needs, shared between tasks
pub struct Gateway {
    detector: Detector,
    selector: Arc<dyn BackendSelector>,
    sink: Arc<dyn CallDetailSink>,
    connect_timeout: Duration,
    buffer_size: usize,
}

impl Gateway {
    pub fn new(detector: Detector, selector: Arc<dyn BackendSelector>, sink: Arc<dyn CallDetailSink>) -> Self {
        Self {
            detector,
            selector,
            sink,
            connect_timeout: Duration::from_secs(5),
            buffer_size: 8192,
        }
    }

    /// Build the gateway described by a configuration
    ///
    /// Backend host names are resolved once, here.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let descriptors = config.protocol_descriptors()?;
        let backends = config.resolve_backends()?;

        let detector = Detector::new(Arc::clone(&descriptors), config.max_identification_length)
            .with_timeout(config.detection_timeout())
            .with_read_size(config.buffer_size);
        let selector = Arc::new(StaticBackends::new(descriptors, backends));
        let sink = Arc::new(CompositeSink::default().with(Arc::new(LogSink)).with(Arc::new(MetricsSink)));

        Ok(Self::new(detector, selector, sink)
            .with_connect_timeout(config.connect_timeout())
            .with_buffer_size(config.buffer_size))
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    /// Handle a single client connection
    ///
    /// Works for any [`Connection`], including upgraded message sockets.
    /// A call detail record is emitted whatever the outcome.
    ///
    /// # Parameters
    ///
    /// * `client` - Client connection, nothing read yet
    ///
    /// # Returns
    ///
    /// Returns the relay byte counts once both directions have closed
    pub async fn handle_connection<C: Connection>(&self, client: C) -> Result<RelayStats> {
        let mut record = CallDetailRecord::new(client.peer_addr().ok());

        let result = self.serve(client, &mut record).await;
        match &result {
            Ok(stats) => {
                record.bytes_in = stats.client_to_backend;
                record.bytes_out = stats.backend_to_client;
            }
            Err(e) => record.set_error(e),
        }
        record.close();
        self.sink.record(&record);

        result
    }

    async fn serve<C: Connection>(&self, mut client: C, record: &mut CallDetailRecord) -> Result<RelayStats> {
        let (detection, trace) = self.detector.detect_traced(&mut client).await;
        record.protocol = trace.protocol;
        record.set_detection_time(trace.elapsed);
        let detected = detection?;
        record.virtual_host = detected.params.virtual_host().map(str::to_string);

        let backend_addr = self.selector.select(&detected.params).ok_or_else(|| {
            GatewayError::BackendUnavailable {
                protocol: detected.protocol,
                virtual_host: detected.params.virtual_host().map(str::to_string),
            }
        })?;
        record.backend = Some(backend_addr);

        let backend = self.connect_backend(backend_addr).await?;
        info!(
            "{} connection {} ({:?}) -> {}",
            detected.protocol,
            record.client.map_or_else(|| "-".to_string(), |a| a.to_string()),
            detected.params.virtual_host(),
            backend_addr
        );

        proxy_data(client, backend, &detected.prefix, self.buffer_size).await
    }

    async fn connect_backend(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| GatewayError::BackendConnectTimeout {
                backend: addr,
                timeout: self.connect_timeout,
            })??;

        // Relays can be idle for long periods
        if let Err(e) = SockRef::from(&stream).set_keepalive(true) {
            warn!("Failed to enable keepalive towards {}: {}", addr, e);
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY towards {}: {}", addr, e);
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::balancer::MockBackendSelector;
    use crate::gateway::telemetry::tests::RecordingSink;
    use crate::protocol::default_descriptors;
    use crate::transport::tests::create_tcp_pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn gateway(selector: MockBackendSelector, sink: Arc<RecordingSink>) -> Gateway {
        let detector = Detector::new(default_descriptors().into(), 64).with_timeout(Some(Duration::from_secs(5)));
        Gateway::new(detector, Arc::new(selector), sink)
    }

    #[tokio::test]
    async fn test_backend_unavailable() {
        let mut selector = MockBackendSelector::new();
        selector.expect_select().times(1).return_const(None);
        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(selector, sink.clone());

        let (mut client, server) = create_tcp_pair().await;
        client.write_all(b"CONNECT\nhost:nowhere\n\n\0").await.unwrap();

        let err = gateway.handle_connection(server).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::BackendUnavailable { protocol: "stomp", virtual_host: Some(ref v) } if v == "nowhere"
        ));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol, Some("stomp"));
        assert_eq!(records[0].error, Some("backend_unavailable"));
        assert!(records[0].detection_ms.is_some());
    }

    #[tokio::test]
    async fn test_relays_to_selected_backend() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();

        let mut selector = MockBackendSelector::new();
        selector
            .expect_select()
            .withf(|p| p.protocol() == "http" && p.virtual_host() == Some("example.com"))
            .return_const(Some(backend_addr));
        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(selector, sink.clone());

        let (mut client, server) = create_tcp_pair().await;
        let task = tokio::spawn(async move { gateway.handle_connection(server).await });

        let request = b"GET / HTTP/1.1\r\nHost: example.com:80\r\n\r\n";
        client.write_all(request).await.unwrap();
        client.shutdown().await.unwrap();

        let (mut upstream, _) = backend.accept().await.unwrap();
        let mut received = Vec::new();
        upstream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, request);
        upstream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        drop(upstream);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 204"));

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_backend, request.len() as u64);

        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].backend, Some(backend_addr));
        assert_eq!(records[0].bytes_in, request.len() as u64);
        assert_eq!(records[0].error, None);
    }

    #[tokio::test]
    async fn test_unknown_protocol_is_rejected() {
        let selector = MockBackendSelector::new();
        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(selector, sink.clone());

        let (mut client, server) = create_tcp_pair().await;
        client.write_all(b"\x00\x00\x00\x00\x00\x00").await.unwrap();

        let err = gateway.handle_connection(server).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoProtocolMatched { .. }));
        let records = sink.records.lock().unwrap();
        assert_eq!(records[0].protocol, None);
        assert!(records[0].detection_ms.is_some());
    }

    #[tokio::test]
    async fn test_malformed_handshake_keeps_protocol() {
        let selector = MockBackendSelector::new();
        let sink = Arc::new(RecordingSink::default());
        let gateway = gateway(selector, sink.clone());

        let (mut client, server) = create_tcp_pair().await;
        // Frame size 4 is below the AMQP minimum
        client.write_all(b"AMQP\x00\x01\x00\x00\x00\x00\x00\x04").await.unwrap();

        let err = gateway.handle_connection(server).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedHandshake { protocol: "amqp", .. }));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].protocol, Some("amqp"));
        assert!(records[0].detection_ms.is_some());
        assert_eq!(records[0].backend, None);
    }
}
