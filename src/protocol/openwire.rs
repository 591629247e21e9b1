//! OpenWire
//!
//! An OpenWire client opens with a size-prefixed `WireFormatInfo` command:
//! `size:u32 type:0x01 magic:"ActiveMQ" version:u32` followed by a loosely
//! marshalled property map. The map's `Host` entry is used as virtual host.

use bytes::Bytes;
use log::{debug, trace};

use super::{match_literal, ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::{ByteReader, DecodeError, Decoded, Decoder, Grammar};

const SIZE_LEN: usize = 4;
const WIRE_FORMAT_INFO: u8 = 0x01;
const MAGIC: &[u8] = b"ActiveMQ";

/// Type, magic and version of a `WireFormatInfo`
pub const MIN_FRAME_SIZE: usize = 1 + 8 + 4;
/// Default `max_frame_size`
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

const HOST_PROPERTY: &str = "Host";
const MAX_NESTING: usize = 8;

// Primitive map value types
const NULL: u8 = 0;
const BOOLEAN: u8 = 1;
const BYTE: u8 = 2;
const CHAR: u8 = 3;
const SHORT: u8 = 4;
const INTEGER: u8 = 5;
const LONG: u8 = 6;
const DOUBLE: u8 = 7;
const FLOAT: u8 = 8;
const STRING: u8 = 9;
const BYTE_ARRAY: u8 = 10;
const MAP: u8 = 11;
const LIST: u8 = 12;
const BIG_STRING: u8 = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenWireProtocol {
    max_frame_size: usize,
}

impl OpenWireProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for OpenWireProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl ProtocolGrammar for OpenWireProtocol {
    const NAME: &'static str = "openwire";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["tcp", "openwire"];

    type Snooper = OpenWireSnooper;

    fn max_identification_length(&self) -> usize {
        SIZE_LEN + 1 + MAGIC.len()
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        match buffer.get(SIZE_LEN) {
            None => MatchResult::NeedMore,
            Some(&WIRE_FORMAT_INFO) => match_literal(&buffer[SIZE_LEN + 1..], MAGIC),
            Some(_) => MatchResult::NoMatch,
        }
    }

    fn snooper(&self) -> OpenWireSnooper {
        OpenWireSnooper {
            decoder: Decoder::new(OpenWireGrammar {
                max_frame_size: self.max_frame_size,
            }),
        }
    }
}

/// Size-prefixed command grammar
#[derive(Debug, Clone)]
pub struct OpenWireGrammar {
    max_frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenWireStep {
    Size,
    Command { size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenWireFrame {
    Size(usize),
    Command(Bytes),
}

impl Grammar for OpenWireGrammar {
    type Step = OpenWireStep;
    type Frame = OpenWireFrame;

    fn initial(&self) -> OpenWireStep {
        OpenWireStep::Size
    }

    fn step(
        &self,
        step: &OpenWireStep,
        input: &[u8],
    ) -> Result<Decoded<OpenWireFrame, OpenWireStep>, DecodeError> {
        match *step {
            OpenWireStep::Size => {
                if input.len() < SIZE_LEN {
                    return Ok(Decoded::NeedMore);
                }
                let size = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
                if size < MIN_FRAME_SIZE {
                    return Err(DecodeError::FrameTooSmall { size, min: MIN_FRAME_SIZE });
                }
                if size > self.max_frame_size {
                    return Err(DecodeError::FrameTooLarge { size, max: self.max_frame_size });
                }
                Ok(Decoded::Frame {
                    frame: OpenWireFrame::Size(size),
                    consumed: SIZE_LEN,
                    next: OpenWireStep::Command { size },
                })
            }
            OpenWireStep::Command { size } if input.len() < size => Ok(Decoded::NeedMore),
            OpenWireStep::Command { size } => Ok(Decoded::Frame {
                frame: OpenWireFrame::Command(Bytes::copy_from_slice(&input[..size])),
                consumed: size,
                next: OpenWireStep::Size,
            }),
        }
    }
}

#[derive(Debug)]
pub struct OpenWireSnooper {
    decoder: Decoder<OpenWireGrammar>,
}

impl Snoop for OpenWireSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        while let Some(frame) = self.decoder.decode(buffer)? {
            trace!("OpenWire frame: {:?}", frame);
            if let OpenWireFrame::Command(command) = frame {
                return parse_wire_format_info(&command).map(Some);
            }
        }
        Ok(None)
    }
}

fn parse_wire_format_info(command: &[u8]) -> Result<ConnectionParameters, DecodeError> {
    const CONTEXT: &str = "openwire wire format info";
    let mut reader = ByteReader::new(command, CONTEXT);

    let command_type = reader.read_u8()?;
    if command_type != WIRE_FORMAT_INFO {
        return Err(DecodeError::malformed(
            CONTEXT,
            format!("first command type {} is not WireFormatInfo", command_type),
        ));
    }
    if reader.read_bytes(MAGIC.len())? != MAGIC {
        return Err(DecodeError::malformed(CONTEXT, "bad magic"));
    }
    let version = reader.read_u32()?;

    let mut params = ConnectionParameters::new(OpenWireProtocol::NAME)
        .with_metadata("version", version.to_string());

    // Older clients stop after the version
    if reader.is_empty() || reader.read_u8()? == 0 {
        return Ok(params);
    }
    let len = reader.read_u32()? as usize;
    let marshalled = reader.read_bytes(len)?;

    let mut properties = Vec::new();
    let mut map = ByteReader::new(marshalled, "openwire properties");
    if let Err(e) = read_map(&mut map, 0, &mut properties) {
        // The command itself is intact; route without the unreadable properties
        debug!("Ignoring unreadable WireFormatInfo properties: {}", e);
    }

    for (key, value) in properties {
        if key == HOST_PROPERTY {
            params = params.with_virtual_host(Some(value));
        } else {
            params = params.with_metadata(key, value);
        }
    }
    Ok(params)
}

/// Read a primitive map, collecting top-level scalar entries
fn read_map(
    reader: &mut ByteReader<'_>,
    depth: usize,
    out: &mut Vec<(String, String)>,
) -> Result<(), DecodeError> {
    let count = reader.read_u32()?;
    for _ in 0..count {
        let key = reader.read_u16_str()?.to_string();
        let value = read_value(reader, depth)?;
        if depth == 0 {
            if let Some(value) = value {
                out.push((key, value));
            }
        }
    }
    Ok(())
}

/// Read one marshalled primitive; composites are skipped and yield `None`
fn read_value(reader: &mut ByteReader<'_>, depth: usize) -> Result<Option<String>, DecodeError> {
    let value = match reader.read_u8()? {
        NULL => return Ok(None),
        BOOLEAN => (reader.read_u8()? != 0).to_string(),
        BYTE => (reader.read_u8()? as i8).to_string(),
        CHAR => char::from_u32(reader.read_u16()? as u32).unwrap_or('?').to_string(),
        SHORT => (reader.read_u16()? as i16).to_string(),
        INTEGER => (reader.read_u32()? as i32).to_string(),
        LONG => (reader.read_u64()? as i64).to_string(),
        DOUBLE => f64::from_bits(reader.read_u64()?).to_string(),
        FLOAT => f32::from_bits(reader.read_u32()?).to_string(),
        STRING => reader.read_u16_str()?.to_string(),
        BIG_STRING => {
            let len = reader.read_u32()? as usize;
            reader.read_str(len)?.to_string()
        }
        BYTE_ARRAY => {
            let len = reader.read_u32()? as usize;
            reader.skip(len)?;
            return Ok(None);
        }
        MAP | LIST if depth >= MAX_NESTING => {
            return Err(DecodeError::malformed("openwire properties", "nesting too deep"));
        }
        MAP => {
            read_map(reader, depth + 1, &mut Vec::new())?;
            return Ok(None);
        }
        LIST => {
            let count = reader.read_u32()?;
            for _ in 0..count {
                read_value(reader, depth + 1)?;
            }
            return Ok(None);
        }
        other => {
            return Err(DecodeError::malformed(
                "openwire properties",
                format!("unknown primitive type {}", other),
            ))
        }
    };
    Ok(Some(value))
}
