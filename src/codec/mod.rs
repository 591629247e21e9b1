//! Incremental decoder framework
//!
//! Protocol handshakes may arrive split across any number of socket reads.
//! Rather than blocking until a whole frame is present, every grammar in this
//! crate is written as a chain of small steps. Each step looks at the bytes
//! available so far and either produces one logical unit or reports that it
//! needs more input, in which case nothing is consumed and the same step is
//! retried once more bytes arrive.
//!
//! The state between attempts is a [`Continuation`]: the tag of the step to run
//! next and the absolute cursor into the connection's prefix buffer. It is a
//! plain value, so the decoding state of a connection can be inspected and
//! asserted on in tests.

mod decoder;
mod error;
mod primitives;

pub use decoder::{Continuation, Decoded, Decoder, Grammar};
pub use error::DecodeError;
pub use primitives::{decode_remaining_length, ByteReader, MAX_REMAINING_LENGTH_BYTES};
