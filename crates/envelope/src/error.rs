//! Error types for the envelope crate.

use thiserror::Error;

/// Codec error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum CodecError {
    // Format errors
    /// Data does not start with a recognised envelope header.
    #[error("invalid envelope header")]
    InvalidHeader,

    /// Envelope header carries a version this build cannot read.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// A chunk frame declares more ciphertext than is allowed.
    #[error("chunk too large: {size} bytes exceeds maximum of {max} bytes")]
    ChunkTooLarge {
        /// Declared ciphertext size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Input ended in the middle of an envelope.
    #[error("envelope truncated: {0}")]
    Truncated(&'static str),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption or authentication failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Chunk counter would wrap around.
    #[error("envelope exceeds maximum chunk count")]
    TooManyChunks,

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

impl From<CodecError> for std::io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) => io,
            CodecError::Truncated(_) => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_display() {
        let err = CodecError::UnsupportedVersion(7);
        assert_eq!(err.to_string(), "unsupported envelope version: 7");
    }

    #[test]
    fn test_chunk_too_large_display() {
        let err = CodecError::ChunkTooLarge {
            size: 100_000,
            max: 65_552,
        };
        assert_eq!(
            err.to_string(),
            "chunk too large: 100000 bytes exceeds maximum of 65552 bytes"
        );
    }

    #[test]
    fn test_decryption_error_display() {
        let err = CodecError::Decryption("authentication tag mismatch".to_string());
        assert_eq!(
            err.to_string(),
            "decryption failed: authentication tag mismatch"
        );
    }

    #[test]
    fn test_into_io_error_truncated() {
        let io_err: std::io::Error = CodecError::Truncated("missing chunk body").into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_into_io_error_keeps_inner_io() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let io_err: std::io::Error = CodecError::Io(inner).into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_into_io_error_invalid_data() {
        let io_err: std::io::Error = CodecError::InvalidHeader.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::InvalidData);
        let inner = io_err.get_ref().unwrap();
        assert!(inner.downcast_ref::<CodecError>().is_some());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CodecError>();
    }
}
