//! Routing parameters extracted from a handshake

use std::collections::BTreeMap;

use serde::Serialize;

/// What a handshake revealed about where a connection wants to go
///
/// Built once by the matching protocol's snooper and handed to the backend
/// selector. Fields are private so the value cannot change after it has been
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionParameters {
    protocol: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    virtual_host: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl ConnectionParameters {
    pub fn new(protocol: &'static str) -> Self {
        Self {
            protocol,
            virtual_host: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the routing key; empty strings are treated as absent
    pub fn with_virtual_host(mut self, virtual_host: Option<impl Into<String>>) -> Self {
        self.virtual_host = virtual_host.map(Into::into).filter(|host| !host.is_empty());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let params = ConnectionParameters::new("mqtt")
            .with_virtual_host(Some("tenant-a"))
            .with_metadata("client-id", "sensor-1");

        assert_eq!(params.protocol(), "mqtt");
        assert_eq!(params.virtual_host(), Some("tenant-a"));
        assert_eq!(params.get("client-id"), Some("sensor-1"));
        assert_eq!(params.get("username"), None);
    }

    #[test]
    fn test_empty_virtual_host_is_absent() {
        let params = ConnectionParameters::new("stomp").with_virtual_host(Some(""));
        assert_eq!(params.virtual_host(), None);
    }

    #[test]
    fn test_serialize() {
        let params = ConnectionParameters::new("amqp").with_virtual_host(Some("vh"));
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"protocol":"amqp","virtual_host":"vh"}"#);
    }
}
