//! HTTP/1.x
//!
//! Detected from the request method; the `Host` header (without its port)
//! is the virtual host. Nothing in the request is rewritten.

use super::text::{match_any, HeaderBlockReader};
use super::{ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::DecodeError;

/// Default `max_frame_size`, bounding the request head
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8_192;

const METHODS: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"TRACE ",
    b"CONNECT ",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProtocol {
    max_frame_size: usize,
}

impl HttpProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for HttpProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl ProtocolGrammar for HttpProtocol {
    const NAME: &'static str = "http";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["http", "ws"];

    type Snooper = HttpSnooper;

    fn max_identification_length(&self) -> usize {
        METHODS.iter().map(|m| m.len()).max().unwrap_or(0)
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        match_any(buffer, METHODS)
    }

    fn snooper(&self) -> HttpSnooper {
        HttpSnooper {
            reader: HeaderBlockReader::new(self.max_frame_size, "http request head"),
        }
    }
}

#[derive(Debug)]
pub struct HttpSnooper {
    reader: HeaderBlockReader,
}

impl Snoop for HttpSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        let Some(block) = self.reader.advance(buffer)? else {
            return Ok(None);
        };

        let mut parts = block.start_line.split_whitespace();
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(DecodeError::malformed(
                "http request line",
                format!("{:?}", block.start_line),
            ));
        };

        let host = block.header("host").map(|value| strip_port(value.trim()));
        Ok(Some(
            ConnectionParameters::new(HttpProtocol::NAME)
                .with_virtual_host(host)
                .with_metadata("method", method)
                .with_metadata("path", path)
                .with_metadata("version", version),
        ))
    }
}

/// `example.com:8080` → `example.com`, `[::1]:80` → `::1`
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    // Unbracketed IPv6 literal, no port to strip
    if host.matches(':').count() > 1 {
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
