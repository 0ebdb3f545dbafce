//! Envelope framing for encrypted content at rest.
//!
//! # Envelope Format
//!
//! Each envelope consists of:
//! - 4 bytes: magic bytes "VFME"
//! - 1 byte: format version
//! - 7 bytes: random nonce prefix
//! - one or more chunks
//!
//! Each chunk consists of:
//! - 1 byte: flags (bit 0 = final chunk)
//! - 4 bytes: ciphertext length (big-endian)
//! - N bytes: AES-256-GCM ciphertext including the 16-byte tag
//!
//! The nonce for chunk `i` is `prefix || i (u32, big-endian) || final`,
//! so dropping, reordering or truncating chunks fails authentication.
//! Several envelopes may be concatenated in one file.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CodecError, Result};

/// Magic bytes identifying an envelope.
pub const ENVELOPE_MAGIC: [u8; 4] = *b"VFME";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Number of leading bytes inspected to decide whether data is encrypted.
pub const SNIFF_SIZE: usize = 5;

/// Size of the random nonce prefix stored in the header.
pub const NONCE_PREFIX_SIZE: usize = 7;

/// Envelope header size: 4 (magic) + 1 (version) + 7 (nonce prefix) = 12 bytes.
pub const HEADER_SIZE: usize = 12;

/// Full AES-GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// Plaintext bytes carried per chunk (64KB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Chunk header size: 1 (flags) + 4 (length) = 5 bytes.
pub const CHUNK_HEADER_SIZE: usize = 5;

/// Largest ciphertext a single chunk may declare.
pub const MAX_CHUNK_CIPHERTEXT: usize = CHUNK_SIZE + TAG_SIZE;

/// Returns true if `prefix` starts with an envelope magic and known version.
pub fn is_envelope(prefix: &[u8]) -> bool {
    prefix.len() >= SNIFF_SIZE
        && prefix[..ENVELOPE_MAGIC.len()] == ENVELOPE_MAGIC
        && prefix[ENVELOPE_MAGIC.len()] == ENVELOPE_VERSION
}

/// Parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Format version.
    pub version: u8,
    /// Nonce prefix shared by every chunk of this envelope.
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl EnvelopeHeader {
    /// Create a header with a fresh random nonce prefix.
    pub fn generate() -> Self {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        OsRng.fill_bytes(&mut nonce_prefix);
        Self {
            version: ENVELOPE_VERSION,
            nonce_prefix,
        }
    }

    /// Encode the header into its on-disk form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&ENVELOPE_MAGIC);
        out[4] = self.version;
        out[5..].copy_from_slice(&self.nonce_prefix);
        out
    }

    /// Decode a header from the first `HEADER_SIZE` bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::Truncated("envelope header"));
        }
        if data[..4] != ENVELOPE_MAGIC {
            return Err(CodecError::InvalidHeader);
        }
        if data[4] != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion(data[4]));
        }

        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&data[5..HEADER_SIZE]);
        Ok(Self {
            version: data[4],
            nonce_prefix,
        })
    }

    /// Nonce for the chunk at `counter`.
    pub fn chunk_nonce(&self, counter: u32, last: bool) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..NONCE_PREFIX_SIZE].copy_from_slice(&self.nonce_prefix);
        nonce[NONCE_PREFIX_SIZE..NONCE_SIZE - 1].copy_from_slice(&counter.to_be_bytes());
        nonce[NONCE_SIZE - 1] = u8::from(last);
        nonce
    }
}

/// Flags carried by each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    /// Flag marking the final chunk of an envelope.
    pub const FINAL: u8 = 0b0000_0001;

    /// Create flags from a raw byte value.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value of the flags.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if the final flag is set.
    #[inline]
    pub fn is_final(self) -> bool {
        self.0 & Self::FINAL != 0
    }

    /// Return flags with the final bit set or cleared.
    #[inline]
    pub fn with_final(self, last: bool) -> Self {
        if last {
            Self(self.0 | Self::FINAL)
        } else {
            Self(self.0 & !Self::FINAL)
        }
    }
}

/// Header preceding each chunk's ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk flags.
    pub flags: ChunkFlags,
    /// Ciphertext length in bytes.
    pub len: u32,
}

impl ChunkHeader {
    /// Encode the chunk header.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out[0] = self.flags.as_byte();
        out[1..].copy_from_slice(&self.len.to_be_bytes());
        out
    }

    /// Decode and validate a chunk header.
    pub fn decode(data: &[u8; CHUNK_HEADER_SIZE]) -> Result<Self> {
        let len = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        if len as usize > MAX_CHUNK_CIPHERTEXT {
            return Err(CodecError::ChunkTooLarge {
                size: len as usize,
                max: MAX_CHUNK_CIPHERTEXT,
            });
        }
        if (len as usize) < TAG_SIZE {
            return Err(CodecError::Truncated("chunk shorter than tag"));
        }
        Ok(Self {
            flags: ChunkFlags::from_byte(data[0]),
            len,
        })
    }

    /// Plaintext length carried by this chunk.
    pub fn plaintext_len(&self) -> usize {
        self.len as usize - TAG_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = EnvelopeHeader::generate();
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"VFME");
        assert_eq!(bytes[4], ENVELOPE_VERSION);
        assert_eq!(EnvelopeHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_generate_is_random() {
        let a = EnvelopeHeader::generate();
        let b = EnvelopeHeader::generate();
        assert_ne!(a.nonce_prefix, b.nonce_prefix);
    }

    #[test]
    fn test_header_decode_bad_magic() {
        let mut bytes = EnvelopeHeader::generate().encode();
        bytes[0] = b'X';
        assert!(matches!(
            EnvelopeHeader::decode(&bytes),
            Err(CodecError::InvalidHeader)
        ));
    }

    #[test]
    fn test_header_decode_unknown_version() {
        let mut bytes = EnvelopeHeader::generate().encode();
        bytes[4] = 9;
        assert!(matches!(
            EnvelopeHeader::decode(&bytes),
            Err(CodecError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_header_decode_short() {
        assert!(matches!(
            EnvelopeHeader::decode(b"VFME"),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_is_envelope() {
        let bytes = EnvelopeHeader::generate().encode();
        assert!(is_envelope(&bytes));
        assert!(is_envelope(&bytes[..SNIFF_SIZE]));
        assert!(!is_envelope(&bytes[..4]));
        assert!(!is_envelope(b"plain text content"));
        assert!(!is_envelope(b""));
        assert!(!is_envelope(b"VFME\x02rest"));
    }

    #[test]
    fn test_chunk_nonce_layout() {
        let header = EnvelopeHeader {
            version: ENVELOPE_VERSION,
            nonce_prefix: [0xAA; NONCE_PREFIX_SIZE],
        };
        let nonce = header.chunk_nonce(0x0102_0304, true);
        assert_eq!(&nonce[..7], &[0xAA; 7]);
        assert_eq!(&nonce[7..11], &[1, 2, 3, 4]);
        assert_eq!(nonce[11], 1);
        assert_ne!(header.chunk_nonce(1, false), header.chunk_nonce(1, true));
    }

    #[test]
    fn test_chunk_flags() {
        let flags = ChunkFlags::default();
        assert!(!flags.is_final());
        let flags = flags.with_final(true);
        assert!(flags.is_final());
        assert_eq!(flags.as_byte(), ChunkFlags::FINAL);
        assert!(!flags.with_final(false).is_final());
    }

    #[test]
    fn test_chunk_header_roundtrip() {
        let header = ChunkHeader {
            flags: ChunkFlags::default().with_final(true),
            len: 1234,
        };
        let decoded = ChunkHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.plaintext_len(), 1234 - TAG_SIZE);
    }

    #[test]
    fn test_chunk_header_too_large() {
        let header = ChunkHeader {
            flags: ChunkFlags::default(),
            len: (MAX_CHUNK_CIPHERTEXT + 1) as u32,
        };
        assert!(matches!(
            ChunkHeader::decode(&header.encode()),
            Err(CodecError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_header_shorter_than_tag() {
        let header = ChunkHeader {
            flags: ChunkFlags::default(),
            len: 3,
        };
        assert!(ChunkHeader::decode(&header.encode()).is_err());
    }
}
