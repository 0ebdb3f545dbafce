//! Storage and per-operation size limits.
//!
//! Usage is recomputed from disk on every check. Two operations racing on
//! the same root can both pass before either writes; the guard is a
//! conservative estimate, not a reservation.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{EngineError, QuotaLimit, Result};

/// Bytes per megabyte as used by every configured limit.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Enforces the storage quota and compression ceiling of one instance.
#[derive(Debug, Clone)]
pub struct QuotaGuard {
    root: PathBuf,
    storage_max_mb: u64,
    compression_max_mb: u64,
}

impl QuotaGuard {
    /// Create a guard. A limit of 0 means unlimited.
    pub fn new(root: impl Into<PathBuf>, storage_max_mb: u64, compression_max_mb: u64) -> Self {
        Self {
            root: root.into(),
            storage_max_mb,
            compression_max_mb,
        }
    }

    /// Total bytes of all files under the root.
    pub fn used_bytes(&self) -> u64 {
        tree_size(&self.root)
    }

    /// Usage in whole megabytes, truncated.
    pub fn used_mb(&self) -> u64 {
        self.used_bytes() / BYTES_PER_MB
    }

    /// Fail if usage already exceeds the storage limit.
    pub fn ensure_not_full(&self) -> Result<()> {
        if self.storage_max_mb == 0 {
            return Ok(());
        }
        let used = self.used_mb();
        if used > self.storage_max_mb {
            debug!(used_mb = used, limit_mb = self.storage_max_mb, "Storage quota exhausted");
            return Err(EngineError::QuotaExceeded(QuotaLimit::Storage));
        }
        Ok(())
    }

    /// Fail if writing `additional` more bytes would exceed the storage limit.
    pub fn ensure_room_for(&self, additional: u64) -> Result<()> {
        if self.storage_max_mb == 0 {
            return Ok(());
        }
        let used = self.used_bytes();
        let projected = used as f64 / BYTES_PER_MB as f64 + additional as f64 / BYTES_PER_MB as f64;
        if projected > self.storage_max_mb as f64 {
            debug!(
                used_bytes = used,
                additional,
                limit_mb = self.storage_max_mb,
                "Storage quota would be exceeded"
            );
            return Err(EngineError::QuotaExceeded(QuotaLimit::Storage));
        }
        Ok(())
    }

    /// Fail if a single zip/unzip would process more than the compression ceiling.
    pub fn ensure_compressible(&self, bytes: u64) -> Result<()> {
        if self.compression_max_mb == 0 {
            return Ok(());
        }
        if bytes > self.compression_max_mb.saturating_mul(BYTES_PER_MB) {
            debug!(
                bytes,
                limit_mb = self.compression_max_mb,
                "Compression ceiling exceeded"
            );
            return Err(EngineError::QuotaExceeded(QuotaLimit::Compression));
        }
        Ok(())
    }
}

/// Total bytes of all regular files under `path`, or its own size for a file.
pub fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
