//! Error types for engine operations.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use envelope::CodecError;
use thiserror::Error;

use crate::router::OperationKind;

/// Placeholder substituted for the physical root in user-visible messages.
pub const ROOT_PLACEHOLDER: &str = "Root";

/// Which quota a request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    /// Total storage under the instance root.
    Storage,
    /// Per-operation zip/unzip ceiling.
    Compression,
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaLimit::Storage => write!(f, "storage"),
            QuotaLimit::Compression => write!(f, "compression"),
        }
    }
}

/// Errors that can occur while serving a file manager request.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The instance root is missing or no longer exists.
    #[error("root folder is missing or invalid: {0}")]
    InvalidRoot(PathBuf),

    /// The target does not resolve to an existing item.
    #[error("item not found: {0}")]
    NotFound(String),

    /// The operation would exceed a configured quota.
    #[error("not enough space: {0} limit exceeded")]
    QuotaExceeded(QuotaLimit),

    /// A single upload exceeds the configured maximum.
    #[error("file is too large: {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge {
        /// Upload size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// The upload extension is not in the accepted list.
    #[error("file type is not accepted: {0}")]
    RejectedExtension(String),

    /// Binary content was requested for text editing.
    #[error("file is not a text file and cannot be edited: {0}")]
    NotEditable(String),

    /// Edit attempted on encrypted content while encryption is disabled.
    #[error("The file is encrypted and cannot be edited without decrypting it first.")]
    EncryptedConflict,

    /// Generic I/O failure with the step that failed.
    #[error("{context}: {source}")]
    OperationFailed {
        /// What was being done.
        context: String,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// The target already exists.
    #[error("item already exists: {0}")]
    AlreadyExists(String),

    /// A new name contains separators or is reserved.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// The operation kind is disabled for the instance.
    #[error("operation is disabled: {0}")]
    OperationDisabled(OperationKind),

    /// No instance is registered under the id.
    #[error("unknown file manager instance: {0}")]
    UnknownInstance(String),

    /// Encryption or decryption failed.
    #[error("encryption error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Wrap an I/O failure, surfacing codec failures carried inside it.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        if source
            .get_ref()
            .is_some_and(|inner| inner.is::<CodecError>())
        {
            let kind = source.kind();
            if let Some(inner) = source.into_inner() {
                return match inner.downcast::<CodecError>() {
                    Ok(codec) => EngineError::Codec(*codec),
                    Err(other) => EngineError::OperationFailed {
                        context: context.into(),
                        source: io::Error::new(kind, other),
                    },
                };
            }
            return EngineError::OperationFailed {
                context: context.into(),
                source: io::Error::from(kind),
            };
        }
        EngineError::OperationFailed {
            context: context.into(),
            source,
        }
    }

    /// User-visible message with the physical root replaced by a placeholder.
    pub fn scrubbed_message(&self, roots: &[&Path]) -> String {
        scrub(&self.to_string(), roots)
    }
}

/// Attach a context string to I/O results.
pub trait IoResultExt<T> {
    /// Convert an I/O error into [`EngineError::OperationFailed`].
    fn op_context<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn op_context<C, F>(self, context: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| EngineError::io(context(), e))
    }
}

/// Replace every occurrence of the given root paths in `message`.
///
/// Longer roots are replaced first so a canonical root that extends the
/// configured one is not left half-scrubbed.
pub fn scrub(message: &str, roots: &[&Path]) -> String {
    let mut roots: Vec<String> = roots
        .iter()
        .map(|r| r.to_string_lossy().trim_end_matches(['/', '\\']).to_string())
        .filter(|r| !r.is_empty())
        .collect();
    roots.sort_by_key(|r| std::cmp::Reverse(r.len()));

    let mut out = message.to_string();
    for root in roots {
        out = out.replace(&root, ROOT_PLACEHOLDER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_display() {
        let err = EngineError::QuotaExceeded(QuotaLimit::Compression);
        assert_eq!(err.to_string(), "not enough space: compression limit exceeded");
    }

    #[test]
    fn test_encrypted_conflict_message() {
        assert_eq!(
            EngineError::EncryptedConflict.to_string(),
            "The file is encrypted and cannot be edited without decrypting it first."
        );
    }

    #[test]
    fn test_operation_failed_keeps_source() {
        let err = EngineError::io(
            "copy /srv/a",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "copy /srv/a: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_unwraps_codec_error() {
        let io_err: io::Error = CodecError::InvalidHeader.into();
        let err = EngineError::io("read", io_err);
        assert!(matches!(err, EngineError::Codec(CodecError::InvalidHeader)));
    }

    #[test]
    fn test_op_context() {
        let result: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.op_context(|| "open file").unwrap_err();
        assert!(matches!(err, EngineError::OperationFailed { .. }));
    }

    #[test]
    fn test_scrub_replaces_root() {
        let msg = "failed to copy /srv/files/docs/a.txt to /srv/files/b";
        let scrubbed = scrub(msg, &[Path::new("/srv/files")]);
        assert_eq!(scrubbed, "failed to copy Root/docs/a.txt to Root/b");
    }

    #[test]
    fn test_scrub_longest_root_first() {
        let msg = "at /private/tmp/x/file";
        let scrubbed = scrub(msg, &[Path::new("/tmp/x"), Path::new("/private/tmp/x/")]);
        assert_eq!(scrubbed, "at Root/file");
    }

    #[test]
    fn test_scrubbed_message() {
        let err = EngineError::InvalidRoot(PathBuf::from("/data/root"));
        let msg = err.scrubbed_message(&[Path::new("/data/root")]);
        assert_eq!(msg, "root folder is missing or invalid: Root");
    }
}
