//! MQTT 3.1, 3.1.1 and 5
//!
//! The first packet must be CONNECT: a `0x10` fixed header byte, a
//! variable-length remaining length, then the protocol name `MQTT` (or
//! `MQIsdp` for 3.1). The user name of the form `vhost/user` carries the
//! virtual host.

use bytes::Bytes;
use log::trace;

use super::{match_literal, ConnectionParameters, MatchResult, ProtocolGrammar, Snoop};
use crate::codec::{
    decode_remaining_length, ByteReader, DecodeError, Decoded, Decoder, Grammar,
    MAX_REMAINING_LENGTH_BYTES,
};

const CONNECT: u8 = 0x10;

/// Default `max_frame_size`, the largest CONNECT packet accepted
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

const FLAG_RESERVED: u8 = 0x01;
const FLAG_WILL: u8 = 0x04;
const FLAG_USERNAME: u8 = 0x80;

const LEVEL_V5: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttProtocol {
    max_frame_size: usize,
}

impl MqttProtocol {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for MqttProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl ProtocolGrammar for MqttProtocol {
    const NAME: &'static str = "mqtt";
    const DEFAULT_SCHEMES: &'static [&'static str] = &["mqtt", "mqtts"];

    type Snooper = MqttSnooper;

    fn max_identification_length(&self) -> usize {
        // header byte, longest varint, name length, "MQIsdp"
        1 + MAX_REMAINING_LENGTH_BYTES + 2 + 6
    }

    fn matches(&self, buffer: &[u8]) -> MatchResult {
        match buffer.first() {
            None => return MatchResult::NeedMore,
            Some(&CONNECT) => {}
            Some(_) => return MatchResult::NoMatch,
        }

        let varint_len = match decode_remaining_length(&buffer[1..], usize::MAX) {
            Ok(Some((_, len))) => len,
            Ok(None) => return MatchResult::NeedMore,
            Err(_) => return MatchResult::NoMatch,
        };

        let name_at = 1 + varint_len;
        let Some(len_bytes) = buffer.get(name_at..name_at + 2) else {
            return MatchResult::NeedMore;
        };
        let name: &[u8] = match u16::from_be_bytes([len_bytes[0], len_bytes[1]]) {
            4 => b"MQTT",
            6 => b"MQIsdp",
            _ => return MatchResult::NoMatch,
        };
        match_literal(&buffer[name_at + 2..], name)
    }

    fn snooper(&self) -> MqttSnooper {
        MqttSnooper {
            decoder: Decoder::new(MqttGrammar {
                max_frame_size: self.max_frame_size,
            }),
        }
    }
}

/// Packet grammar: fixed header with varint length, then the packet body
#[derive(Debug, Clone)]
pub struct MqttGrammar {
    max_frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttStep {
    FixedHeader,
    Body { remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttFrame {
    FixedHeader { remaining: usize },
    Connect(Bytes),
}

impl Grammar for MqttGrammar {
    type Step = MqttStep;
    type Frame = MqttFrame;

    fn initial(&self) -> MqttStep {
        MqttStep::FixedHeader
    }

    fn step(&self, step: &MqttStep, input: &[u8]) -> Result<Decoded<MqttFrame, MqttStep>, DecodeError> {
        match *step {
            MqttStep::FixedHeader => {
                let Some(&packet_type) = input.first() else {
                    return Ok(Decoded::NeedMore);
                };
                if packet_type != CONNECT {
                    return Err(DecodeError::malformed(
                        "mqtt fixed header",
                        format!("first packet type {:#04x} is not CONNECT", packet_type),
                    ));
                }
                match decode_remaining_length(&input[1..], self.max_frame_size)? {
                    None => Ok(Decoded::NeedMore),
                    Some((remaining, len)) => Ok(Decoded::Frame {
                        frame: MqttFrame::FixedHeader { remaining },
                        consumed: 1 + len,
                        next: MqttStep::Body { remaining },
                    }),
                }
            }
            MqttStep::Body { remaining } if input.len() < remaining => Ok(Decoded::NeedMore),
            MqttStep::Body { remaining } => Ok(Decoded::Frame {
                frame: MqttFrame::Connect(Bytes::copy_from_slice(&input[..remaining])),
                consumed: remaining,
                next: MqttStep::FixedHeader,
            }),
        }
    }
}

#[derive(Debug)]
pub struct MqttSnooper {
    decoder: Decoder<MqttGrammar>,
}

impl MqttSnooper {
    pub fn decoder(&self) -> &Decoder<MqttGrammar> {
        &self.decoder
    }
}

impl Snoop for MqttSnooper {
    fn snoop(&mut self, buffer: &[u8]) -> Result<Option<ConnectionParameters>, DecodeError> {
        while let Some(frame) = self.decoder.decode(buffer)? {
            trace!("MQTT frame: {:?}", frame);
            if let MqttFrame::Connect(body) = frame {
                let max = self.decoder.grammar().max_frame_size;
                return parse_connect(&body, max).map(Some);
            }
        }
        Ok(None)
    }
}

fn parse_connect(body: &[u8], max_length: usize) -> Result<ConnectionParameters, DecodeError> {
    const CONTEXT: &str = "mqtt connect";
    let mut reader = ByteReader::new(body, CONTEXT);

    let name = reader.read_u16_str()?;
    if name != "MQTT" && name != "MQIsdp" {
        return Err(DecodeError::malformed(CONTEXT, format!("unknown protocol name {:?}", name)));
    }
    let level = reader.read_u8()?;
    let flags = reader.read_u8()?;
    if flags & FLAG_RESERVED != 0 {
        return Err(DecodeError::malformed(CONTEXT, "reserved flag is set"));
    }
    let keep_alive = reader.read_u16()?;
    if level == LEVEL_V5 {
        let properties = reader.read_varint(max_length)?;
        reader.skip(properties)?;
    }

    let client_id = reader.read_u16_str()?;

    if flags & FLAG_WILL != 0 {
        if level == LEVEL_V5 {
            let properties = reader.read_varint(max_length)?;
            reader.skip(properties)?;
        }
        reader.read_u16_str()?;
        let payload = reader.read_u16()? as usize;
        reader.skip(payload)?;
    }

    let username = if flags & FLAG_USERNAME != 0 {
        Some(reader.read_u16_str()?)
    } else {
        None
    };

    let virtual_host = username.and_then(|user| user.split_once('/')).map(|(vhost, _)| vhost);

    let mut params = ConnectionParameters::new(MqttProtocol::NAME)
        .with_virtual_host(virtual_host)
        .with_metadata("client-id", client_id)
        .with_metadata("protocol-level", level.to_string())
        .with_metadata("keep-alive", keep_alive.to_string());
    if let Some(user) = username {
        params = params.with_metadata("username", user);
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn connect(level: u8, client_id: &str, username: Option<&str>) -> Vec<u8> {
        let mut body = utf8(if level == 3 { "MQIsdp" } else { "MQTT" });
        body.push(level);
        body.push(if username.is_some() { FLAG_USERNAME | 0x02 } else { 0x02 });
        body.extend_from_slice(&60u16.to_be_bytes());
        if level == LEVEL_V5 {
            // one property: session expiry interval
            body.extend_from_slice(&[0x05, 0x11, 0x00, 0x00, 0x00, 0x0a]);
        }
        body.extend_from_slice(&utf8(client_id));
        if let Some(user) = username {
            body.extend_from_slice(&utf8(user));
        }

        let mut packet = vec![CONNECT];
        let mut len = body.len();
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            packet.push(byte);
            if len == 0 {
                break;
            }
        }
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    fn test_matches() {
        let mqtt = MqttProtocol::default();
        let packet = connect(4, "c", None);

        assert_eq!(mqtt.matches(&packet[..1]), MatchResult::NeedMore);
        assert_eq!(mqtt.matches(&packet[..5]), MatchResult::NeedMore);
        assert_eq!(mqtt.matches(&packet), MatchResult::Matched);
        assert_eq!(mqtt.matches(&connect(3, "c", None)), MatchResult::Matched);
        assert_eq!(mqtt.matches(b"\x20\x02\x00\x00"), MatchResult::NoMatch);
        assert_eq!(mqtt.matches(b"\x10\x0a\x00\x05MQTT"), MatchResult::NoMatch);
        assert_eq!(mqtt.matches(b"\x10\x0a\x00\x04MQXX"), MatchResult::NoMatch);
        // varint that never terminates
        assert_eq!(mqtt.matches(b"\x10\xff\xff\xff\xff"), MatchResult::NoMatch);
    }

    #[test]
    fn test_snoop_username_vhost() {
        let packet = connect(4, "sensor-7", Some("plant-a/operator"));
        let params = MqttProtocol::default().snooper().snoop(&packet).unwrap().unwrap();

        assert_eq!(params.protocol(), "mqtt");
        assert_eq!(params.virtual_host(), Some("plant-a"));
        assert_eq!(params.get("client-id"), Some("sensor-7"));
        assert_eq!(params.get("username"), Some("plant-a/operator"));
        assert_eq!(params.get("protocol-level"), Some("4"));
        assert_eq!(params.get("keep-alive"), Some("60"));
    }

    #[test]
    fn test_snoop_without_username() {
        let packet = connect(4, "anon", None);
        let params = MqttProtocol::default().snooper().snoop(&packet).unwrap().unwrap();
        assert_eq!(params.virtual_host(), None);
        assert_eq!(params.get("username"), None);
    }

    #[test]
    fn test_snoop_v5_properties() {
        let packet = connect(LEVEL_V5, "v5-client", Some("tenant/user"));
        let params = MqttProtocol::default().snooper().snoop(&packet).unwrap().unwrap();
        assert_eq!(params.virtual_host(), Some("tenant"));
        assert_eq!(params.get("client-id"), Some("v5-client"));
    }

    #[test]
    fn test_snoop_two_byte_remaining_length() {
        let client_id = "x".repeat(200);
        let packet = connect(4, &client_id, None);
        assert_eq!(packet[1] & 0x80, 0x80);

        let mut snooper = MqttProtocol::default().snooper();
        assert_eq!(snooper.snoop(&packet[..2]).unwrap(), None);
        assert_eq!(snooper.decoder().continuation().cursor, 0);
        assert_eq!(snooper.snoop(&packet[..3]).unwrap(), None);
        assert_eq!(snooper.decoder().continuation().cursor, 3);

        let params = snooper.snoop(&packet).unwrap().unwrap();
        assert_eq!(params.get("client-id"), Some(client_id.as_str()));
    }

    #[test]
    fn test_snoop_rejects_oversized_packet() {
        let packet = connect(4, &"x".repeat(200), None);
        let err = MqttProtocol::new(64).snooper().snoop(&packet).unwrap_err();
        assert!(matches!(err, DecodeError::MessageTooLarge { max: 64, .. }));
    }

    #[test]
    fn test_snoop_rejects_long_varint() {
        let err = MqttProtocol::new(usize::MAX)
            .snooper()
            .snoop(b"\x10\x80\x80\x80\x80\x01")
            .unwrap_err();
        assert_eq!(err, DecodeError::VarintTooLong { max_bytes: 4 });
    }
}
