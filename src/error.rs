use thiserror::Error;

/// Errors raised while encoding or decoding mesh traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("truncated input at offset {offset}: needed {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    /// The trailing checksum does not match the payload.
    #[error("checksum mismatch: frame carries 0x{expected:02X}, payload hashes to 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("frame payload too long: {len} bytes (max 255)")]
    FrameTooLong { len: usize },

    /// A name or list does not fit its single-byte length prefix.
    #[error("{field} too long: {len} (max 255)")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("varint at offset {offset} has no terminating byte")]
    UnterminatedVarint { offset: usize },

    #[error("varint at offset {offset} does not fit in 64 bits")]
    VarintOverflow { offset: usize },

    #[error("varint at offset {offset} is not minimally encoded")]
    InvalidVarint { offset: usize },

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },
}

impl ProtocolError {
    /// Shift the offset of a positional error by `base`, used when a
    /// sub-slice was decoded in isolation.
    pub fn at(self, base: usize) -> Self {
        match self {
            ProtocolError::Truncated { offset, needed } => ProtocolError::Truncated {
                offset: offset + base,
                needed,
            },
            ProtocolError::UnterminatedVarint { offset } => ProtocolError::UnterminatedVarint {
                offset: offset + base,
            },
            ProtocolError::VarintOverflow { offset } => ProtocolError::VarintOverflow {
                offset: offset + base,
            },
            ProtocolError::InvalidVarint { offset } => ProtocolError::InvalidVarint {
                offset: offset + base,
            },
            other => other,
        }
    }

    /// Whether this error means the bytes on the wire were corrupted, as
    /// opposed to well-formed but unexpected content.
    pub fn is_integrity(&self) -> bool {
        matches!(self, ProtocolError::ChecksumMismatch { .. })
    }
}

/// Failures of the HTTP exchange itself, before any status code is known.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid base64 in reply: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Errors that stop the hub loop.
#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("giving up after {attempts} failed transport attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::Truncated {
            offset: 10,
            needed: 2,
        };
        assert!(err.to_string().contains("offset 10"));

        let err = ProtocolError::ChecksumMismatch {
            expected: 0xE1,
            actual: 0x00,
        };
        assert!(err.to_string().contains("0xE1"));
        assert!(err.is_integrity());
    }

    #[test]
    fn test_offset_shift() {
        let err = ProtocolError::UnterminatedVarint { offset: 1 }.at(5);
        assert_eq!(err, ProtocolError::UnterminatedVarint { offset: 6 });

        let err = ProtocolError::FrameTooLong { len: 300 }.at(5);
        assert_eq!(err, ProtocolError::FrameTooLong { len: 300 });
    }
}
