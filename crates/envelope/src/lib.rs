//! # VaultFM Envelope Library
//!
//! This crate provides the at-rest encryption format used by the VaultFM
//! file engine and a streaming codec built on top of it.
//!
//! ## Overview
//!
//! - **Framing**: self-describing envelope header and chunk layout
//! - **Key Derivation**: passphrase to AES-256-GCM key
//! - **Streams**: `Read` adapters that seal or open content chunk by chunk
//! - **Codec**: enabled/disabled strategy that sniffs content state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Codec                   │  enabled / disabled
//! ├─────────────────────────────────────────┤
//! │      EncryptReader / DecryptReader      │  64 KiB chunks
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  VFME header, chunk frames
//! ├─────────────────────────────────────────┤
//! │           File or memory buffer         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use envelope::Codec;
//!
//! let codec = Codec::from_settings(Some("passphrase"), true);
//! let sealed = codec.encrypt_bytes(b"hello").unwrap();
//! assert!(codec.is_encrypted(sealed.as_slice()).unwrap());
//! assert_eq!(codec.decrypt_bytes(&sealed).unwrap(), b"hello");
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Enabled/disabled codec and stream wrappers
//! - [`framing`]: Envelope header and chunk frames
//! - [`key`]: Key derivation and chunk sealing
//! - [`stream`]: Streaming encrypt/decrypt readers
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod framing;
pub mod key;
pub mod stream;

pub use codec::{Codec, CodecReader};
pub use error::{CodecError, Result};
pub use framing::{
    is_envelope, ChunkFlags, ChunkHeader, EnvelopeHeader, CHUNK_SIZE, ENVELOPE_MAGIC,
    ENVELOPE_VERSION, HEADER_SIZE, SNIFF_SIZE, TAG_SIZE,
};
pub use key::{EnvelopeKey, KEY_LENGTH};
pub use stream::{scan_plaintext_len, sniff, DecryptReader, EncryptReader, Sniffed};
