//! Sandboxed file operations for one instance root.
//!
//! This module provides:
//! - Virtual path resolution confined to the instance root
//! - Storage and compression quota checks
//! - Collision-free naming for new items
//! - Listing, search, and per-entry metadata
//! - Create, delete, rename, copy, move, encrypt/decrypt and edit
//! - Zip archives sealed as a single envelope
//! - Decrypting downloads and encrypting uploads
//!
//! # Security
//!
//! Every caller-supplied path goes through [`Sandbox::resolve`]. Existing
//! paths are canonicalized and re-checked, so symlinks cannot lead out of
//! the root.

pub mod archive;
pub mod listing;
pub mod naming;
pub mod operations;
pub mod quota;
pub mod sandbox;
pub mod transfer;

pub use listing::{FileDetail, FolderDetail, FolderListing};
pub use naming::{unique_name, ItemKind};
pub use operations::{Transform, TransferMode};
pub use quota::QuotaGuard;
pub use sandbox::{Resolution, Sandbox};
pub use transfer::{Disposition, FileStream, Preview};
