//! Resumable decoder driven by "bytes arrived" events

use std::fmt;

use super::error::DecodeError;

/// Outcome of a single decoding step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<F, S> {
    /// Not enough bytes yet; nothing was consumed
    NeedMore,
    /// One unit was parsed from the first `consumed` bytes of the input
    Frame {
        /// The parsed unit
        frame: F,
        /// Number of input bytes the unit occupied
        consumed: usize,
        /// Step to run on the bytes that follow
        next: S,
    },
}

/// A protocol grammar expressed as a chain of steps
///
/// `step` must be idempotent under partial input: when it returns
/// [`Decoded::NeedMore`] it may be called again later with a longer input
/// that starts with the same bytes.
pub trait Grammar {
    /// Tag naming which step to run next
    type Step: Clone + fmt::Debug + PartialEq;
    /// Logical unit produced by a step
    type Frame;

    /// Step to start from on a fresh connection
    fn initial(&self) -> Self::Step;

    /// Try to decode one unit from `input`, which starts at the cursor
    fn step(
        &self,
        step: &Self::Step,
        input: &[u8],
    ) -> Result<Decoded<Self::Frame, Self::Step>, DecodeError>;
}

/// Where decoding resumes: a step tag and an absolute buffer offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation<S> {
    /// Step to run on the next attempt
    pub step: S,
    /// Offset into the buffer the step reads from
    pub cursor: usize,
}

/// Drives a [`Grammar`] over a buffer that only ever grows
///
/// The buffer itself is owned by the caller (it is the connection's prefix
/// buffer, which must later be replayed untouched); the decoder only keeps the
/// continuation.
#[derive(Debug, Clone)]
pub struct Decoder<G: Grammar> {
    grammar: G,
    continuation: Continuation<G::Step>,
}

impl<G: Grammar> Decoder<G> {
    /// Create a decoder positioned at the grammar's initial step
    pub fn new(grammar: G) -> Self {
        let step = grammar.initial();
        Self::resume(grammar, Continuation { step, cursor: 0 })
    }

    /// Create a decoder from an explicit continuation
    pub fn resume(grammar: G, continuation: Continuation<G::Step>) -> Self {
        Self { grammar, continuation }
    }

    /// Current continuation
    pub fn continuation(&self) -> &Continuation<G::Step> {
        &self.continuation
    }

    /// The grammar being driven
    pub fn grammar(&self) -> &G {
        &self.grammar
    }

    /// Attempt to decode the next unit from `buffer`
    ///
    /// Returns `Ok(None)` when more bytes are needed. On success the cursor
    /// advances by exactly the number of bytes the unit occupied.
    pub fn decode(&mut self, buffer: &[u8]) -> Result<Option<G::Frame>, DecodeError> {
        let input = buffer.get(self.continuation.cursor..).unwrap_or_default();

        match self.grammar.step(&self.continuation.step, input)? {
            Decoded::NeedMore => Ok(None),
            Decoded::Frame { frame, consumed, next } => {
                debug_assert!(consumed <= input.len(), "step consumed past its input");
                self.continuation = Continuation {
                    step: next,
                    cursor: self.continuation.cursor + consumed,
                };
                Ok(Some(frame))
            }
        }
    }
}
