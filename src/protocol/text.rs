//! Line-oriented header blocks shared by the text protocols
//!
//! STOMP and HTTP both open with a start line followed by `name:value`
//! header lines and an empty line. The grammar yields one line per step and
//! bounds the whole block by the protocol's maximum frame size.

use super::MatchResult;
use crate::codec::{DecodeError, Decoded, Decoder, Grammar};

#[derive(Debug, Clone)]
pub struct LineGrammar {
    max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineStep {
    /// Bytes of the block consumed before this line
    read: usize,
}

impl Grammar for LineGrammar {
    type Step = LineStep;
    type Frame = String;

    fn initial(&self) -> LineStep {
        LineStep { read: 0 }
    }

    fn step(&self, step: &LineStep, input: &[u8]) -> Result<Decoded<String, LineStep>, DecodeError> {
        let Some(newline) = input.iter().position(|&b| b == b'\n') else {
            if step.read + input.len() > self.max_size {
                return Err(DecodeError::FrameTooLarge {
                    size: step.read + input.len(),
                    max: self.max_size,
                });
            }
            return Ok(Decoded::NeedMore);
        };

        let consumed = newline + 1;
        if step.read + consumed > self.max_size {
            return Err(DecodeError::FrameTooLarge {
                size: step.read + consumed,
                max: self.max_size,
            });
        }

        let line = input[..newline].strip_suffix(b"\r").unwrap_or(&input[..newline]);
        let line = std::str::from_utf8(line)
            .map_err(|e| DecodeError::malformed("header line", format!("invalid UTF-8: {}", e)))?;

        Ok(Decoded::Frame {
            frame: line.to_string(),
            consumed,
            next: LineStep { read: step.read + consumed },
        })
    }
}

/// A complete header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub start_line: String,
    /// Header names and raw values, in arrival order
    pub headers: Vec<(String, String)>,
}

impl HeaderBlock {
    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Collects lines until the empty line that ends the block
#[derive(Debug)]
pub struct HeaderBlockReader {
    decoder: Decoder<LineGrammar>,
    start_line: Option<String>,
    headers: Vec<(String, String)>,
    context: &'static str,
}

impl HeaderBlockReader {
    pub fn new(max_size: usize, context: &'static str) -> Self {
        Self {
            decoder: Decoder::new(LineGrammar { max_size }),
            start_line: None,
            headers: Vec::new(),
            context,
        }
    }

    pub fn advance(&mut self, buffer: &[u8]) -> Result<Option<HeaderBlock>, DecodeError> {
        while let Some(line) = self.decoder.decode(buffer)? {
            if self.start_line.is_none() {
                self.start_line = Some(line);
                continue;
            }
            if line.is_empty() {
                return Ok(Some(HeaderBlock {
                    start_line: self.start_line.take().unwrap_or_default(),
                    headers: std::mem::take(&mut self.headers),
                }));
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(DecodeError::malformed(
                    self.context,
                    format!("header line without ':': {:?}", line),
                ));
            };
            self.headers.push((key.to_string(), value.to_string()));
        }
        Ok(None)
    }
}

/// Match `buffer` against several literals at once
pub fn match_any(buffer: &[u8], candidates: &[&[u8]]) -> MatchResult {
    let mut result = MatchResult::NoMatch;
    for candidate in candidates {
        match super::match_literal(buffer, candidate) {
            MatchResult::Matched => return MatchResult::Matched,
            MatchResult::NeedMore => result = MatchResult::NeedMore,
            MatchResult::NoMatch => {}
        }
    }
    result
}
