//! Byte-level helpers shared by the protocol grammars

use super::error::DecodeError;

/// Maximum number of bytes in an MQTT remaining-length field
pub const MAX_REMAINING_LENGTH_BYTES: usize = 4;

/// Decode an MQTT style remaining-length varint from the start of `input`
///
/// Each byte carries seven bits of magnitude, least significant group first,
/// and a continuation flag in the high bit. Returns `Ok(None)` while the
/// terminating byte has not arrived, otherwise the decoded value and the
/// number of bytes it occupied.
pub fn decode_remaining_length(
    input: &[u8],
    max_length: usize,
) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut value: usize = 0;
    let mut shift = 0u32;

    for (index, &byte) in input.iter().enumerate() {
        value |= ((byte & 0x7f) as usize) << shift;
        if value > max_length {
            return Err(DecodeError::MessageTooLarge { length: value, max: max_length });
        }
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        if index + 1 == MAX_REMAINING_LENGTH_BYTES {
            return Err(DecodeError::VarintTooLong { max_bytes: MAX_REMAINING_LENGTH_BYTES });
        }
        shift += 7;
    }

    Ok(None)
}

/// Bounds-checked reader over a complete frame body
///
/// Unlike grammar steps, a `ByteReader` is only used once the whole unit is
/// buffered, so running out of bytes is a structural error.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
    context: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], context: &'static str) -> Self {
        Self { data, position: 0, context }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::malformed(
                self.context,
                format!(
                    "needed {} bytes at offset {}, only {} available",
                    len,
                    self.position,
                    self.remaining()
                ),
            ));
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read `len` bytes as UTF-8
    pub fn read_str(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        let context = self.context;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| DecodeError::malformed(context, format!("invalid UTF-8: {}", e)))
    }

    /// Read a string prefixed by a big-endian `u16` length
    pub fn read_u16_str(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.read_u16()? as usize;
        self.read_str(len)
    }

    /// Read an MQTT varint; the value must be fully present
    pub fn read_varint(&mut self, max_length: usize) -> Result<usize, DecodeError> {
        match decode_remaining_length(&self.data[self.position..], max_length)? {
            Some((value, len)) => {
                self.position += len;
                Ok(value)
            }
            None => Err(DecodeError::malformed(self.context, "truncated variable length integer")),
        }
    }
}
