//! Key derivation and chunk sealing for envelopes.
//!
//! A passphrase is turned into a 256-bit AES-GCM key by hashing it with
//! SHA-256 under a fixed domain label. The derived key is never exposed;
//! callers only see a short fingerprint suitable for logs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{CodecError, Result};
use crate::framing::NONCE_SIZE;

/// Length of a derived key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Number of fingerprint bytes rendered in hex.
const FINGERPRINT_LENGTH: usize = 4;

/// Domain label mixed into key derivation.
const KEY_DOMAIN: &[u8] = b"vaultfm/envelope/v1";

/// A symmetric key used to seal and open envelope chunks.
#[derive(Clone)]
pub struct EnvelopeKey {
    cipher: Aes256Gcm,
    fingerprint: [u8; FINGERPRINT_LENGTH],
}

impl EnvelopeKey {
    /// Derives a key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();

        let mut raw = [0u8; KEY_LENGTH];
        raw.copy_from_slice(&digest);
        Self::from_bytes(&raw)
    }

    /// Creates a key from raw key bytes.
    pub fn from_bytes(bytes: &[u8; KEY_LENGTH]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(bytes));

        let digest = Sha256::digest(bytes);
        let mut fingerprint = [0u8; FINGERPRINT_LENGTH];
        fingerprint.copy_from_slice(&digest[..FINGERPRINT_LENGTH]);

        Self { cipher, fingerprint }
    }

    /// Short hex fingerprint identifying this key without revealing it.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.fingerprint)
    }

    /// Seals one chunk of plaintext under the given nonce.
    pub(crate) fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| CodecError::Encryption(e.to_string()))
    }

    /// Opens one chunk of ciphertext under the given nonce.
    pub(crate) fn open(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Decryption("authentication tag mismatch".to_string()))
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey")
            .field("fingerprint", &self.fingerprint())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_passphrase_same_fingerprint() {
        let a = EnvelopeKey::from_passphrase("correct horse");
        let b = EnvelopeKey::from_passphrase("correct horse");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), FINGERPRINT_LENGTH * 2);
    }

    #[test]
    fn test_different_passphrase_different_fingerprint() {
        let a = EnvelopeKey::from_passphrase("correct horse");
        let b = EnvelopeKey::from_passphrase("battery staple");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = EnvelopeKey::from_passphrase("secret");
        let nonce = [7u8; NONCE_SIZE];
        let sealed = key.seal(&nonce, b"chunk data").unwrap();
        assert_ne!(sealed.as_slice(), b"chunk data");
        assert_eq!(key.open(&nonce, &sealed).unwrap(), b"chunk data");
    }

    #[test]
    fn test_open_with_wrong_nonce_fails() {
        let key = EnvelopeKey::from_passphrase("secret");
        let sealed = key.seal(&[1u8; NONCE_SIZE], b"chunk data").unwrap();
        let result = key.open(&[2u8; NONCE_SIZE], &sealed);
        assert!(matches!(result, Err(CodecError::Decryption(_))));
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let nonce = [3u8; NONCE_SIZE];
        let sealed = EnvelopeKey::from_passphrase("one").seal(&nonce, b"x").unwrap();
        let result = EnvelopeKey::from_passphrase("two").open(&nonce, &sealed);
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EnvelopeKey::from_passphrase("secret");
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("secret"));
    }
}
