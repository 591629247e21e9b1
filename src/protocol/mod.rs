//! Protocol detection module
//!
//! Every supported wire protocol is described by a type implementing
//! [`ProtocolGrammar`]: a pure `matches` test over the leading bytes of a
//! connection, and a snooper that keeps reading the handshake until it can
//! produce the [`ConnectionParameters`] used for routing.
//!
//! The set of protocols is closed: [`Protocol`] has one variant per grammar,
//! and the enabled subset is chosen at startup from configuration.

mod amqp;
mod http;
mod mqtt;
mod openwire;
mod params;
mod stomp;
mod text;
mod tls;

pub use amqp::{AmqpProtocol, AmqpSnooper};
pub use http::{HttpProtocol, HttpSnooper};
pub use mqtt::{MqttProtocol, MqttSnooper};
pub use openwire::{OpenWireProtocol, OpenWireSnooper};
pub use params::ConnectionParameters;
pub use stomp::{StompProtocol, StompSnooper};
pub use tls::{TlsProtocol, TlsSnooper};

use crate::codec::DecodeError;

/// Answer of a protocol to "is this buffer yours?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The buffered bytes belong to this protocol
    Matched,
    /// The buffered bytes can never belong to this protocol
    NoMatch,
    /// Undecidable until more bytes arrive
    NeedMore,
}

/// Detection and handshake grammar of one protocol
pub trait ProtocolGrammar {
    /// Protocol name used in logs, metrics and configuration
    const NAME: &'static str;
    /// URI schemes that name this protocol in backend configuration
    const DEFAULT_SCHEMES: &'static [&'static str];

    /// Per-connection handshake state
    type Snooper: Snoop;

    /// Most leading bytes `matches` ever needs to decide
    ///
    /// `matches` never answers [`MatchResult::NeedMore`] once the buffer is at
    /// least this long.
    fn max_identification_length(&self) -> usize;

    /// Pure test over the bytes buffered so far
    fn matches(&self, buffer: &[u8]) -> MatchResult;

    /// Fresh snooper for a connection that matched
    fn snooper(&self) -> Self::Snooper;
}

/// Incremental handshake reader
pub trait Snoop {
    /// Continue reading the handshake
    ///
    /// `buffer` is the whole prefix buffer of the connection, including the
    /// bytes already seen by earlier calls. Returns `Ok(None)` until enough of
    /// the handshake has arrived.
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError>;
}

/// The closed set of supported protocols
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Amqp(AmqpProtocol),
    Mqtt(MqttProtocol),
    OpenWire(OpenWireProtocol),
    Stomp(StompProtocol),
    Http(HttpProtocol),
    Tls(TlsProtocol),
}

/// Snoop state of whichever protocol matched
#[derive(Debug)]
pub enum Snooper {
    Amqp(AmqpSnooper),
    Mqtt(MqttSnooper),
    OpenWire(OpenWireSnooper),
    Stomp(StompSnooper),
    Http(HttpSnooper),
    Tls(TlsSnooper),
}

/// Names accepted by [`Protocol::from_name`], in the default priority order
pub const PROTOCOL_NAMES: &[&str] = &[
    AmqpProtocol::NAME,
    MqttProtocol::NAME,
    OpenWireProtocol::NAME,
    StompProtocol::NAME,
    HttpProtocol::NAME,
    TlsProtocol::NAME,
];

impl Protocol {
    /// Create a protocol by name, optionally overriding its maximum frame size
    pub fn from_name(name: &str, max_frame_size: Option<usize>) -> Option<Self> {
        let protocol = match name.to_lowercase().as_str() {
            "amqp" => Self::Amqp(max_frame_size.map_or_else(AmqpProtocol::default, AmqpProtocol::new)),
            "mqtt" => Self::Mqtt(max_frame_size.map_or_else(MqttProtocol::default, MqttProtocol::new)),
            "openwire" => {
                Self::OpenWire(max_frame_size.map_or_else(OpenWireProtocol::default, OpenWireProtocol::new))
            }
            "stomp" => Self::Stomp(max_frame_size.map_or_else(StompProtocol::default, StompProtocol::new)),
            "http" => Self::Http(max_frame_size.map_or_else(HttpProtocol::default, HttpProtocol::new)),
            "tls" | "ssl" => Self::Tls(max_frame_size.map_or_else(TlsProtocol::default, TlsProtocol::new)),
            _ => return None,
        };
        Some(protocol)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Amqp(_) => AmqpProtocol::NAME,
            Self::Mqtt(_) => MqttProtocol::NAME,
            Self::OpenWire(_) => OpenWireProtocol::NAME,
            Self::Stomp(_) => StompProtocol::NAME,
            Self::Http(_) => HttpProtocol::NAME,
            Self::Tls(_) => TlsProtocol::NAME,
        }
    }

    pub fn default_schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Amqp(_) => AmqpProtocol::DEFAULT_SCHEMES,
            Self::Mqtt(_) => MqttProtocol::DEFAULT_SCHEMES,
            Self::OpenWire(_) => OpenWireProtocol::DEFAULT_SCHEMES,
            Self::Stomp(_) => StompProtocol::DEFAULT_SCHEMES,
            Self::Http(_) => HttpProtocol::DEFAULT_SCHEMES,
            Self::Tls(_) => TlsProtocol::DEFAULT_SCHEMES,
        }
    }

    pub fn max_identification_length(&self) -> usize {
        match self {
            Self::Amqp(p) => p.max_identification_length(),
            Self::Mqtt(p) => p.max_identification_length(),
            Self::OpenWire(p) => p.max_identification_length(),
            Self::Stomp(p) => p.max_identification_length(),
            Self::Http(p) => p.max_identification_length(),
            Self::Tls(p) => p.max_identification_length(),
        }
    }

    pub fn matches(&self, buffer: &[u8]) -> MatchResult {
        match self {
            Self::Amqp(p) => p.matches(buffer),
            Self::Mqtt(p) => p.matches(buffer),
            Self::OpenWire(p) => p.matches(buffer),
            Self::Stomp(p) => p.matches(buffer),
            Self::Http(p) => p.matches(buffer),
            Self::Tls(p) => p.matches(buffer),
        }
    }

    pub fn snooper(&self) -> Snooper {
        match self {
            Self::Amqp(p) => Snooper::Amqp(p.snooper()),
            Self::Mqtt(p) => Snooper::Mqtt(p.snooper()),
            Self::OpenWire(p) => Snooper::OpenWire(p.snooper()),
            Self::Stomp(p) => Snooper::Stomp(p.snooper()),
            Self::Http(p) => Snooper::Http(p.snooper()),
            Self::Tls(p) => Snooper::Tls(p.snooper()),
        }
    }
}

impl Snoop for Snooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        match self {
            Self::Amqp(s) => s.snoop(buffer),
            Self::Mqtt(s) => s.snoop(buffer),
            Self::OpenWire(s) => s.snoop(buffer),
            Self::Stomp(s) => s.snoop(buffer),
            Self::Http(s) => s.snoop(buffer),
            Self::Tls(s) => s.snoop(buffer),
        }
    }
}

/// An enabled protocol together with the URI schemes that select it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    protocol: Protocol,
    schemes: Vec<String>,
}

impl ProtocolDescriptor {
    /// Create a descriptor; an empty scheme list falls back to the defaults
    pub fn new(protocol: Protocol, schemes: Vec<String>) -> Self {
        let schemes = if schemes.is_empty() {
            protocol.default_schemes().iter().map(|s| s.to_string()).collect()
        } else {
            schemes.into_iter().map(|s| s.to_lowercase()).collect()
        };
        Self { protocol, schemes }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn name(&self) -> &'static str {
        self.protocol.name()
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// Whether a backend URI scheme refers to this protocol
    pub fn handles_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    pub fn max_identification_length(&self) -> usize {
        self.protocol.max_identification_length()
    }

    pub fn matches(&self, buffer: &[u8]) -> MatchResult {
        self.protocol.matches(buffer)
    }

    pub fn snooper(&self) -> Snooper {
        self.protocol.snooper()
    }
}

impl From<Protocol> for ProtocolDescriptor {
    fn from(protocol: Protocol) -> Self {
        Self::new(protocol, Vec::new())
    }
}

/// Descriptors for every supported protocol, in default priority order
pub fn default_descriptors() -> Vec<ProtocolDescriptor> {
    PROTOCOL_NAMES
        .iter()
        .filter_map(|name| Protocol::from_name(name, None))
        .map(ProtocolDescriptor::from)
        .collect()
}

/// Compare `buffer` against a literal, tolerating a short buffer
///
/// Returns `Matched` when `buffer` starts with all of `expected`, `NeedMore`
/// when `buffer` is a strict prefix of it, `NoMatch` otherwise.
pub(crate) fn match_literal(buffer: &[u8], expected: &[u8]) -> MatchResult {
    let n = buffer.len().min(expected.len());
    if buffer[..n] != expected[..n] {
        MatchResult::NoMatch
    } else if n < expected.len() {
        MatchResult::NeedMore
    } else {
        MatchResult::Matched
    }
}
