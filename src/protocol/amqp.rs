//! AMQP 1.0
//!
//! A connection starts with the 8 byte protocol header `AMQP id major minor
//! revision`, followed by length-prefixed frames. For plain AMQP (protocol id
//! 0) the first performative is `open`, whose `hostname` field names the
//! virtual host.

use bytes::Bytes;
use log::trace;

use super::{match_literal, ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::{ByteReader, DecodeError, Decoded, Decoder, Grammar};

const MAGIC: &[u8] = b"AMQP";
const PROTOCOL_HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 8;

/// Smallest legal frame: a bare header
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_LEN;
/// Default `max_frame_size`
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

const FRAME_TYPE_AMQP: u8 = 0x00;
const OPEN_DESCRIPTOR_CODE: u64 = 0x10;
const OPEN_DESCRIPTOR_SYMBOL: &str = "amqp:open:list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpProtocol {
    max_frame_size: usize,
}

impl AmqpProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for AmqpProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl ProtocolGrammar for AmqpProtocol {
    const NAME: &'static str = "amqp";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["amqp", "amqps"];

    type Snooper = AmqpSnooper;

    fn max_identification_length(&self) -> usize {
        PROTOCOL_HEADER_LEN
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        match_literal(buffer, MAGIC)
    }

    fn snooper(&self) -> AmqpSnooper {
        AmqpSnooper {
            decoder: Decoder::new(AmqpGrammar {
                max_frame_size: self.max_frame_size,
            }),
            header: None,
        }
    }
}

/// Frame grammar: protocol header, then header/body pairs
#[derive(Debug, Clone)]
pub struct AmqpGrammar {
    max_frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmqpStep {
    ProtocolHeader,
    FrameHeader,
    FrameBody {
        frame_type: u8,
        /// Bytes left in the frame after the fixed header
        remaining: usize,
        /// Extended header bytes to skip before the payload
        extended: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmqpFrame {
    ProtocolHeader { id: u8, major: u8, minor: u8, revision: u8 },
    FrameHeader { size: usize, frame_type: u8, channel: u16 },
    FrameBody { frame_type: u8, payload: Bytes },
}

impl Grammar for AmqpGrammar {
    type Step = AmqpStep;
    type Frame = AmqpFrame;

    fn initial(&self) -> AmqpStep {
        AmqpStep::ProtocolHeader
    }

    fn step(&self, step: &AmqpStep, input: &[u8]) -> Result<Decoded<AmqpFrame, AmqpStep>, DecodeError> {
        match *step {
            AmqpStep::ProtocolHeader => {
                if input.len() < PROTOCOL_HEADER_LEN {
                    return Ok(Decoded::NeedMore);
                }
                if &input[..4] != MAGIC {
                    return Err(DecodeError::malformed("amqp protocol header", "missing AMQP magic"));
                }
                Ok(Decoded::Frame {
                    frame: AmqpFrame::ProtocolHeader {
                        id: input[4],
                        major: input[5],
                        minor: input[6],
                        revision: input[7],
                    },
                    consumed: PROTOCOL_HEADER_LEN,
                    next: AmqpStep::FrameHeader,
                })
            }
            AmqpStep::FrameHeader => {
                if input.len() < 4 {
                    return Ok(Decoded::NeedMore);
                }
                // The size is judged before the rest of the header arrives
                let size = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
                if size < MIN_FRAME_SIZE {
                    return Err(DecodeError::FrameTooSmall { size, min: MIN_FRAME_SIZE });
                }
                if size > self.max_frame_size {
                    return Err(DecodeError::FrameTooLarge { size, max: self.max_frame_size });
                }
                if input.len() < FRAME_HEADER_LEN {
                    return Ok(Decoded::NeedMore);
                }

                let doff = input[4] as usize;
                let header_len = doff * 4;
                if header_len < FRAME_HEADER_LEN || header_len > size {
                    return Err(DecodeError::malformed(
                        "amqp frame header",
                        format!("data offset {} out of range for frame size {}", doff, size),
                    ));
                }
                let frame_type = input[5];
                let channel = u16::from_be_bytes([input[6], input[7]]);

                Ok(Decoded::Frame {
                    frame: AmqpFrame::FrameHeader { size, frame_type, channel },
                    consumed: FRAME_HEADER_LEN,
                    next: AmqpStep::FrameBody {
                        frame_type,
                        remaining: size - FRAME_HEADER_LEN,
                        extended: header_len - FRAME_HEADER_LEN,
                    },
                })
            }
            AmqpStep::FrameBody { frame_type, remaining, extended } => {
                if input.len() < remaining {
                    return Ok(Decoded::NeedMore);
                }
                Ok(Decoded::Frame {
                    frame: AmqpFrame::FrameBody {
                        frame_type,
                        payload: Bytes::copy_from_slice(&input[extended..remaining]),
                    },
                    consumed: remaining,
                    next: AmqpStep::FrameHeader,
                })
            }
        }
    }
}

/// Reads the protocol header and the `open` performative
#[derive(Debug)]
pub struct AmqpSnooper {
    decoder: Decoder<AmqpGrammar>,
    header: Option<ConnectionParameters>,
}

impl AmqpSnooper {
    pub fn decoder(&self) -> &Decoder<AmqpGrammar> {
        &self.decoder
    }
}

impl Snoop for AmqpSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        while let Some(frame) = self.decoder.decode(buffer)? {
            trace!("AMQP frame: {:?}", frame);
            match frame {
                AmqpFrame::ProtocolHeader { id, major, minor, revision } => {
                    let params = ConnectionParameters::new(AmqpProtocol::NAME)
                        .with_metadata("protocol-id", id.to_string())
                        .with_metadata("version", format!("{}.{}.{}", major, minor, revision));
                    // SASL and TLS layers wait for the server to speak first
                    if id != 0 {
                        return Ok(Some(params));
                    }
                    self.header = Some(params);
                }
                AmqpFrame::FrameHeader { .. } => {}
                // Empty frames are heartbeats, but only one frame's worth of them
                AmqpFrame::FrameBody { payload, .. } if payload.is_empty() => {
                    let max = self.decoder.grammar().max_frame_size;
                    let skipped = self.decoder.continuation().cursor.saturating_sub(PROTOCOL_HEADER_LEN);
                    if skipped > max {
                        return Err(DecodeError::malformed(
                            "amqp frame",
                            format!("no open performative within {} bytes of heartbeats", max),
                        ));
                    }
                }
                AmqpFrame::FrameBody { frame_type, payload } => {
                    if frame_type != FRAME_TYPE_AMQP {
                        return Err(DecodeError::malformed(
                            "amqp frame",
                            format!("unexpected frame type {:#04x} before open", frame_type),
                        ));
                    }
                    let open = decode_open(&payload)?;
                    let mut params = self
                        .header
                        .take()
                        .unwrap_or_else(|| ConnectionParameters::new(AmqpProtocol::NAME))
                        .with_virtual_host(open.hostname);
                    if let Some(container_id) = open.container_id {
                        params = params.with_metadata("container-id", container_id);
                    }
                    return Ok(Some(params));
                }
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Open {
    container_id: Option<String>,
    hostname: Option<String>,
}

/// Decode the first two fields of an `open` performative
fn decode_open(payload: &[u8]) -> Result<Open, DecodeError> {
    const CONTEXT: &str = "amqp open";
    let mut reader = ByteReader::new(payload, CONTEXT);

    if reader.read_u8()? != 0x00 {
        return Err(DecodeError::malformed(CONTEXT, "performative is not a described type"));
    }

    let is_open = match reader.read_u8()? {
        0x53 => reader.read_u8()? as u64 == OPEN_DESCRIPTOR_CODE,
        0x80 => reader.read_u64()? == OPEN_DESCRIPTOR_CODE,
        0x44 => false,
        0xa3 => {
            let len = reader.read_u8()? as usize;
            reader.read_str(len)? == OPEN_DESCRIPTOR_SYMBOL
        }
        0xb3 => {
            let len = reader.read_u32()? as usize;
            reader.read_str(len)? == OPEN_DESCRIPTOR_SYMBOL
        }
        code => {
            return Err(DecodeError::malformed(
                CONTEXT,
                format!("unsupported descriptor encoding {:#04x}", code),
            ))
        }
    };
    if !is_open {
        return Err(DecodeError::malformed(CONTEXT, "first performative is not open"));
    }

    let count = match reader.read_u8()? {
        0x45 => 0,
        0xc0 => {
            reader.read_u8()?;
            reader.read_u8()? as usize
        }
        0xd0 => {
            reader.read_u32()?;
            reader.read_u32()? as usize
        }
        code => {
            return Err(DecodeError::malformed(
                CONTEXT,
                format!("expected list, found type {:#04x}", code),
            ))
        }
    };

    let mut open = Open::default();
    if count >= 1 {
        open.container_id = read_string(&mut reader)?;
    }
    if count >= 2 {
        open.hostname = read_string(&mut reader)?;
    }
    Ok(open)
}

/// Read a nullable string or symbol
fn read_string(reader: &mut ByteReader<'_>) -> Result<Option<String>, DecodeError> {
    let len = match reader.read_u8()? {
        0x40 => return Ok(None),
        0xa1 | 0xa3 => reader.read_u8()? as usize,
        0xb1 | 0xb3 => reader.read_u32()? as usize,
        code => {
            return Err(DecodeError::malformed(
                "amqp open",
                format!("expected string, found type {:#04x}", code),
            ))
        }
    };
    Ok(Some(reader.read_str(len)?.to_string()))
}
