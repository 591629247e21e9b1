//! Call detail records
//!
//! One record is emitted per connection when it ends, successful or not.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use metrics::{counter, histogram};
use serde::Serialize;
use uuid::Uuid;

use crate::common::GatewayError;

/// Summary of one client connection
#[derive(Debug, Clone, Serialize)]
pub struct CallDetailRecord {
    pub connection_id: Uuid,
    pub accepted_at: DateTime<Utc>,
    pub client: Option<SocketAddr>,
    pub protocol: Option<&'static str>,
    pub virtual_host: Option<String>,
    pub backend: Option<SocketAddr>,
    pub detection_ms: Option<u64>,
    pub duration_ms: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Error label, see [`GatewayError::kind`]
    pub error: Option<&'static str>,
    pub error_message: Option<String>,
}

impl CallDetailRecord {
    /// Start a record for a freshly accepted connection
    pub fn new(client: Option<SocketAddr>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            accepted_at: Utc::now(),
            client,
            protocol: None,
            virtual_host: None,
            backend: None,
            detection_ms: None,
            duration_ms: 0,
            bytes_in: 0,
            bytes_out: 0,
            error: None,
            error_message: None,
        }
    }

    pub fn set_detection_time(&mut self, elapsed: Duration) {
        self.detection_ms = Some(elapsed.as_millis() as u64);
    }

    pub fn set_error(&mut self, error: &GatewayError) {
        self.error = Some(error.kind());
        self.error_message = Some(error.to_string());
    }

    /// Stamp the total duration measured from `accepted_at`
    pub fn close(&mut self) {
        let elapsed = Utc::now().signed_duration_since(self.accepted_at);
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
    }
}

/// Receives records; must not block
pub trait CallDetailSink: Send + Sync {
    fn record(&self, record: &CallDetailRecord);
}

/// Writes each record as one JSON line through `log`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl CallDetailSink for LogSink {
    fn record(&self, record: &CallDetailRecord) {
        match serde_json::to_string(record) {
            Ok(line) => info!(target: "cdr", "{}", line),
            Err(e) => warn!("Failed to serialize call detail record {}: {}", record.connection_id, e),
        }
    }
}

/// Feeds records into the `metrics` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl CallDetailSink for MetricsSink {
    fn record(&self, record: &CallDetailRecord) {
        let protocol = record.protocol.unwrap_or("unknown");

        counter!("gateway.connections.total", "protocol" => protocol).increment(1);
        if let Some(error) = record.error {
            counter!("gateway.connections.failed", "protocol" => protocol, "error" => error).increment(1);
        }
        if let Some(detection_ms) = record.detection_ms {
            histogram!("gateway.detection.duration_ms", "protocol" => protocol).record(detection_ms as f64);
        }
        histogram!("gateway.connection.duration_ms", "protocol" => protocol).record(record.duration_ms as f64);
        counter!("gateway.bytes.client_to_backend", "protocol" => protocol).increment(record.bytes_in);
        counter!("gateway.bytes.backend_to_client", "protocol" => protocol).increment(record.bytes_out);
    }
}

/// Fans a record out to several sinks
#[derive(Clone, Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn CallDetailSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn CallDetailSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn CallDetailSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl CallDetailSink for CompositeSink {
    fn record(&self, record: &CallDetailRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
