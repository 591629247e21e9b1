//! STOMP 1.0 to 1.2
//!
//! The first frame is `CONNECT` (or `STOMP` in 1.2) with a `host` header
//! naming the virtual host.

use super::text::{match_any, HeaderBlockReader};
use super::{ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::DecodeError;

/// Default `max_frame_size`, bounding the CONNECT header block
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8_192;

const COMMANDS: &[&[u8]] = &[b"CONNECT\n", b"CONNECT\r\n", b"STOMP\n", b"STOMP\r\n"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompProtocol {
    max_frame_size: usize,
}

impl StompProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for StompProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl ProtocolGrammar for StompProtocol {
    const NAME: &'static str = "stomp";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["stomp", "stomp+ssl"];

    type Snooper = StompSnooper;

    fn max_identification_length(&self) -> usize {
        b"CONNECT\r\n".len()
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        match_any(buffer, COMMANDS)
    }

    fn snooper(&self) -> StompSnooper {
        StompSnooper {
            reader: HeaderBlockReader::new(self.max_frame_size, "stomp connect"),
        }
    }
}

#[derive(Debug)]
pub struct StompSnooper {
    reader: HeaderBlockReader,
}

impl Snoop for StompSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        let Some(block) = self.reader.advance(buffer)? else {
            return Ok(None);
        };

        let mut params = ConnectionParameters::new(StompProtocol::NAME)
            .with_virtual_host(block.header("host"))
            .with_metadata("command", block.start_line.as_str());
        for key in ["accept-version", "login", "heart-beat"] {
            if let Some(value) = block.header(key) {
                params = params.with_metadata(key, value);
            }
        }
        Ok(Some(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let stomp = StompProtocol::default();
        assert_eq!(stomp.matches(b"CONN"), MatchResult::NeedMore);
        assert_eq!(stomp.matches(b"CONNECT"), MatchResult::NeedMore);
        assert_eq!(stomp.matches(b"CONNECT\n"), MatchResult::Matched);
        assert_eq!(stomp.matches(b"STOMP\r\nhost"), MatchResult::Matched);
        assert_eq!(stomp.matches(b"CONNECT example.com:443 HTTP/1.1"), MatchResult::NoMatch);
        assert_eq!(stomp.matches(b"SEND\n"), MatchResult::NoMatch);
    }

    #[test]
    fn test_snoop_host_header() {
        let frame = b"STOMP\naccept-version:1.2\nhost:orders\nlogin:app\n\n\0";
        let params = StompProtocol::default().snooper().snoop(frame).unwrap().unwrap();

        assert_eq!(params.protocol(), "stomp");
        assert_eq!(params.virtual_host(), Some("orders"));
        assert_eq!(params.get("accept-version"), Some("1.2"));
        assert_eq!(params.get("login"), Some("app"));
        assert_eq!(params.get("command"), Some("STOMP"));
    }

    #[test]
    fn test_first_header_wins() {
        let frame = b"CONNECT\r\nhost:first\r\nhost:second\r\n\r\n";
        let params = StompProtocol::default().snooper().snoop(frame).unwrap().unwrap();
        assert_eq!(params.virtual_host(), Some("first"));
    }

    #[test]
    fn test_incomplete_frame_waits() {
        let mut snooper = StompProtocol::default().snooper();
        assert_eq!(snooper.snoop(b"CONNECT\nhost:a\n").unwrap(), None);
        let params = snooper.snoop(b"CONNECT\nhost:a\n\n").unwrap().unwrap();
        assert_eq!(params.virtual_host(), Some("a"));
    }
}
