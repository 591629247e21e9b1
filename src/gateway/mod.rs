//! Gateway module
//!
//! This module implements the connection pipeline: protocol detection,
//! backend selection, prefix replay and relaying, plus the listener service
//! that runs one task per connection.

pub mod balancer;
pub mod detector;
pub mod telemetry;
mod forwarder;
mod handler;
mod message;
mod service;

pub use balancer::{Backend, BackendSelector, StaticBackends};
pub use detector::{Detected, DetectionSession, DetectionTrace, Detector, Rejection, SessionState};
pub use forwarder::{proxy_data, replay_prefix, RelayStats};
pub use handler::Gateway;
pub use message::{GatewayHandle, GatewayMessage};
pub use service::{GatewayService, DEFAULT_SHUTDOWN_GRACE};
pub use telemetry::{CallDetailRecord, CallDetailSink, CompositeSink, LogSink, MetricsSink};
