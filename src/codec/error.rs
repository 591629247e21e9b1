//! Decode errors
//!
//! Every variant is terminal for the connection: a handshake that violated its
//! grammar once cannot become valid by reading more bytes.

use thiserror::Error;

/// Structural violation found while decoding a handshake
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A length-prefixed frame declared fewer bytes than its header needs
    #[error("frame size {size} is below the minimum of {min} bytes")]
    FrameTooSmall { size: usize, min: usize },

    /// A length-prefixed frame declared more bytes than the configured maximum
    #[error("frame size {size} exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A variable-length integer used more continuation bytes than allowed
    #[error("variable length integer longer than {max_bytes} bytes")]
    VarintTooLong { max_bytes: usize },

    /// A variable-length message length exceeded the configured maximum
    #[error("message length {length} exceeds the maximum of {max} bytes")]
    MessageTooLarge { length: usize, max: usize },

    /// Any other grammar violation
    #[error("malformed {context}: {reason}")]
    Malformed { context: &'static str, reason: String },
}

impl DecodeError {
    /// Shorthand for [`DecodeError::Malformed`]
    pub fn malformed(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            context,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::FrameTooLarge { size: 70000, max: 65536 };
        assert_eq!(err.to_string(), "frame size 70000 exceeds the maximum of 65536 bytes");

        let err = DecodeError::malformed("amqp open", "missing descriptor");
        assert!(err.to_string().contains("amqp open"));
        assert!(err.to_string().contains("missing descriptor"));
    }
}
