//! TLS / SSL
//!
//! Detection is a heuristic over the record layer, the same check NGINX and
//! HAProxy style sniffers make: a handshake content type (0x16) followed by a
//! plausible version pair, or an SSLv2 style header with the high bit of the
//! first byte set and a client hello marker at byte 2. It does not validate the
//! handshake and is not a security boundary.
//!
//! Snooping reassembles the ClientHello from its records and reads the SNI
//! `server_name`, which becomes the virtual host. TLS is never terminated here.

use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use super::{ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::{ByteReader, DecodeError, Decoded, Decoder, Grammar};

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const SSLV2_CLIENT_HELLO: u8 = 0x01;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;

/// Largest record the record layer allows (plaintext limit plus expansion)
pub const MAX_RECORD_LEN: usize = 16_384 + 2_048;
/// Default `max_frame_size`, the largest ClientHello accepted
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_ALPN: u16 = 0x0010;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const SNI_HOST_NAME: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsProtocol {
    max_frame_size: usize,
}

impl TlsProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for TlsProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Whether `major.minor` is SSLv3 or a TLS version up to 1.3
fn is_record_version(major: u8, minor: u8) -> bool {
    major == 0x03 && minor <= 0x04
}

/// Name of a protocol version as written in hellos and records
fn version_name(major: u8, minor: u8) -> String {
    match (major, minor) {
        (0x00, 0x02) => "SSLv2".to_string(),
        (0x03, 0x00) => "SSLv3".to_string(),
        (0x03, 0x01) => "TLSv1.0".to_string(),
        (0x03, 0x02) => "TLSv1.1".to_string(),
        (0x03, 0x03) => "TLSv1.2".to_string(),
        (0x03, 0x04) => "TLSv1.3".to_string(),
        _ => format!("Unknown ({}.{})", major, minor),
    }
}

impl ProtocolGrammar for TlsProtocol {
    const NAME: &'static str = "tls";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["ssl", "tls", "https"];

    type Snooper = TlsSnooper;

    fn max_identification_length(&self) -> usize {
        RECORD_HEADER_LEN
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        let Some(&first) = buffer.first() else {
            return MatchResult::NeedMore;
        };

        if first == CONTENT_TYPE_HANDSHAKE {
            // Fixed offset: content type, then the version pair
            if buffer.len() < 3 {
                return MatchResult::NeedMore;
            }
            if is_record_version(buffer[1], buffer[2]) {
                return MatchResult::Matched;
            }
            trace!("Invalid TLS version: {}.{}", buffer[1], buffer[2]);
            return MatchResult::NoMatch;
        }

        if first & 0x80 != 0 {
            // SSLv2 header: two length bytes, then the message type
            if buffer.len() < RECORD_HEADER_LEN {
                return MatchResult::NeedMore;
            }
            let version_ok = (buffer[3] == 0x00 && buffer[4] == 0x02)
                || is_record_version(buffer[3], buffer[4]);
            if buffer[2] == SSLV2_CLIENT_HELLO && version_ok {
                return MatchResult::Matched;
            }
        }

        MatchResult::NoMatch
    }

    fn snooper(&self) -> TlsSnooper {
        TlsSnooper {
            decoder: Decoder::new(RecordGrammar {
                max_record_len: MAX_RECORD_LEN.min(self.max_frame_size),
            }),
            handshake: BytesMut::new(),
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Record layer grammar
#[derive(Debug, Clone)]
pub struct RecordGrammar {
    max_record_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStep {
    Header,
    Body { length: usize },
    /// The SSLv2 header carries no records to follow
    Sslv2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFrame {
    Header { major: u8, minor: u8, length: usize },
    Body(Bytes),
    Sslv2Hello { major: u8, minor: u8 },
}

impl Grammar for RecordGrammar {
    type Step = RecordStep;
    type Frame = RecordFrame;

    fn initial(&self) -> RecordStep {
        RecordStep::Header
    }

    fn step(&self, step: &RecordStep, input: &[u8]) -> Result<Decoded<RecordFrame, RecordStep>, DecodeError> {
        match *step {
            RecordStep::Header | RecordStep::Sslv2 if input.len() < RECORD_HEADER_LEN => {
                Ok(Decoded::NeedMore)
            }
            RecordStep::Sslv2 => Ok(Decoded::NeedMore),
            RecordStep::Header if input[0] & 0x80 != 0 => Ok(Decoded::Frame {
                frame: RecordFrame::Sslv2Hello { major: input[3], minor: input[4] },
                consumed: RECORD_HEADER_LEN,
                next: RecordStep::Sslv2,
            }),
            RecordStep::Header => {
                if input[0] != CONTENT_TYPE_HANDSHAKE {
                    return Err(DecodeError::malformed(
                        "tls record",
                        format!("content type {:#04x} before ClientHello completed", input[0]),
                    ));
                }
                let length = u16::from_be_bytes([input[3], input[4]]) as usize;
                if length == 0 {
                    return Err(DecodeError::FrameTooSmall { size: 0, min: 1 });
                }
                if length > self.max_record_len {
                    return Err(DecodeError::FrameTooLarge { size: length, max: self.max_record_len });
                }
                Ok(Decoded::Frame {
                    frame: RecordFrame::Header { major: input[1], minor: input[2], length },
                    consumed: RECORD_HEADER_LEN,
                    next: RecordStep::Body { length },
                })
            }
            RecordStep::Body { length } if input.len() < length => Ok(Decoded::NeedMore),
            RecordStep::Body { length } => Ok(Decoded::Frame {
                frame: RecordFrame::Body(Bytes::copy_from_slice(&input[..length])),
                consumed: length,
                next: RecordStep::Header,
            }),
        }
    }
}

/// Reassembles the ClientHello handshake message
#[derive(Debug)]
pub struct TlsSnooper {
    decoder: Decoder<RecordGrammar>,
    handshake: BytesMut,
    max_frame_size: usize,
}

impl Snoop for TlsSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        while let Some(frame) = self.decoder.decode(buffer)? {
            match frame {
                RecordFrame::Sslv2Hello { major, minor } => {
                    return Ok(Some(
                        ConnectionParameters::new(TlsProtocol::NAME)
                            .with_metadata("tls-version", version_name(0x00, 0x02))
                            .with_metadata("client-version", version_name(major, minor)),
                    ));
                }
                RecordFrame::Header { major, minor, length } => {
                    trace!("TLS record {} of {} bytes", version_name(major, minor), length);
                }
                RecordFrame::Body(body) => {
                    self.handshake.extend_from_slice(&body);
                    if let Some(params) = self.try_client_hello()? {
                        return Ok(Some(params));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl TlsSnooper {
    fn try_client_hello(&self) -> Result<Option<ConnectionParameters>, DecodeError> {
        if self.handshake.len() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }
        let mut header = ByteReader::new(&self.handshake, "tls handshake");
        let message_type = header.read_u8()?;
        if message_type != HANDSHAKE_CLIENT_HELLO {
            return Err(DecodeError::malformed(
                "tls handshake",
                format!("first handshake message {} is not ClientHello", message_type),
            ));
        }
        let length = header.read_u24()? as usize;
        if length > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge { size: length, max: self.max_frame_size });
        }
        if header.remaining() < length {
            return Ok(None);
        }

        let hello = parse_client_hello(header.read_bytes(length)?)?;
        let (major, minor) = hello
            .highest_version
            .unwrap_or(((hello.client_version >> 8) as u8, hello.client_version as u8));
        debug!("ClientHello parsed, SNI: {:?}", hello.server_name);

        let mut params = ConnectionParameters::new(TlsProtocol::NAME)
            .with_virtual_host(hello.server_name)
            .with_metadata("tls-version", version_name(major, minor));
        if !hello.alpn.is_empty() {
            params = params.with_metadata("alpn", hello.alpn.join(","));
        }
        Ok(Some(params))
    }
}

#[derive(Debug, Default)]
struct ClientHello {
    client_version: u16,
    server_name: Option<String>,
    alpn: Vec<String>,
    highest_version: Option<(u8, u8)>,
}

fn parse_client_hello(body: &[u8]) -> Result<ClientHello, DecodeError> {
    const CONTEXT: &str = "tls client hello";
    let mut reader = ByteReader::new(body, CONTEXT);
    let mut hello = ClientHello {
        client_version: reader.read_u16()?,
        ..ClientHello::default()
    };

    reader.skip(32)?;
    let session_id = reader.read_u8()? as usize;
    reader.skip(session_id)?;
    let cipher_suites = reader.read_u16()? as usize;
    reader.skip(cipher_suites)?;
    let compression = reader.read_u8()? as usize;
    reader.skip(compression)?;

    if reader.is_empty() {
        return Ok(hello);
    }

    let extensions_len = reader.read_u16()? as usize;
    let mut extensions = ByteReader::new(reader.read_bytes(extensions_len)?, CONTEXT);
    while !extensions.is_empty() {
        let kind = extensions.read_u16()?;
        let len = extensions.read_u16()? as usize;
        let mut data = ByteReader::new(extensions.read_bytes(len)?, CONTEXT);

        match kind {
            EXT_SERVER_NAME => {
                let list_len = data.read_u16()? as usize;
                let mut names = ByteReader::new(data.read_bytes(list_len)?, CONTEXT);
                while !names.is_empty() {
                    let name_type = names.read_u8()?;
                    let name_len = names.read_u16()? as usize;
                    let name = names.read_str(name_len)?;
                    if name_type == SNI_HOST_NAME && hello.server_name.is_none() {
                        hello.server_name = Some(name.to_string());
                    }
                }
            }
            EXT_ALPN => {
                let list_len = data.read_u16()? as usize;
                let mut protocols = ByteReader::new(data.read_bytes(list_len)?, CONTEXT);
                while !protocols.is_empty() {
                    let len = protocols.read_u8()? as usize;
                    hello.alpn.push(String::from_utf8_lossy(protocols.read_bytes(len)?).into_owned());
                }
            }
            EXT_SUPPORTED_VERSIONS => {
                let list_len = data.read_u8()? as usize;
                let mut versions = ByteReader::new(data.read_bytes(list_len)?, CONTEXT);
                while !versions.is_empty() {
                    let version = versions.read_u16()?;
                    let pair = ((version >> 8) as u8, version as u8);
                    // GREASE values are not real versions
                    if is_record_version(pair.0, pair.1) && hello.highest_version.map_or(true, |v| pair > v) {
                        hello.highest_version = Some(pair);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(hello)
}
