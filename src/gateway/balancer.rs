//! Backend selection
//!
//! A backend is configured as `scheme://host:port`, optionally pinned to a
//! virtual host. The scheme names the protocol through the enabled
//! descriptors' scheme aliases.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

use crate::protocol::{ConnectionParameters, ProtocolDescriptor};

/// Picks the backend for a detected connection
#[cfg_attr(test, mockall::automock)]
pub trait BackendSelector: Send + Sync {
    /// `None` when no backend serves these parameters
    fn select(&self, params: &ConnectionParameters) -> Option<SocketAddr>;
}

/// One configured backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    scheme: String,
    addr: SocketAddr,
    virtual_host: Option<String>,
}

impl Backend {
    pub fn new(scheme: impl Into<String>, addr: SocketAddr, virtual_host: Option<String>) -> Self {
        Self {
            scheme: scheme.into().to_lowercase(),
            addr,
            virtual_host,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }
}

/// Round-robin over a fixed backend list
///
/// Backends pinned to the connection's virtual host are preferred; backends
/// without a virtual host serve everything else.
#[derive(Debug)]
pub struct StaticBackends {
    descriptors: Arc<[ProtocolDescriptor]>,
    backends: Vec<Backend>,
    cursor: AtomicUsize,
}

impl StaticBackends {
    pub fn new(descriptors: Arc<[ProtocolDescriptor]>, backends: Vec<Backend>) -> Self {
        Self {
            descriptors,
            backends,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    fn serves(&self, backend: &Backend, protocol: &str) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.name() == protocol && d.handles_scheme(&backend.scheme))
    }
}

impl BackendSelector for StaticBackends {
    fn select(&self, params: &ConnectionParameters) -> Option<SocketAddr> {
        let protocol_backends: Vec<&Backend> = self
            .backends
            .iter()
            .filter(|b| self.serves(b, params.protocol()))
            .collect();

        let pinned: Vec<&Backend> = match params.virtual_host() {
            Some(vhost) => protocol_backends
                .iter()
                .copied()
                .filter(|b| b.virtual_host().is_some_and(|v| v.eq_ignore_ascii_case(vhost)))
                .collect(),
            None => Vec::new(),
        };
        let pool = if pinned.is_empty() {
            protocol_backends
                .into_iter()
                .filter(|b| b.virtual_host.is_none())
                .collect()
        } else {
            pinned
        };

        if pool.is_empty() {
            debug!(
                "No {} backend for virtual host {:?}",
                params.protocol(),
                params.virtual_host()
            );
            return None;
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(pool[index].addr)
    }
}
