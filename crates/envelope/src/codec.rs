//! Content codec with enabled and disabled states.
//!
//! Both states expose the same operations. When disabled, every transform
//! is a byte-identity pass-through but [`Codec::is_encrypted`] still sniffs,
//! so content sealed under another configuration stays recognisable.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::key::EnvelopeKey;
use crate::stream::{scan_plaintext_len, sniff, DecryptReader, EncryptReader, Sniffed};

/// Transparent encryption codec for a single instance.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Content is sealed on write and opened on read.
    Enabled(EnvelopeKey),
    /// Content passes through unchanged.
    Disabled,
}

/// A stream produced by [`Codec::encrypt_stream`] or [`Codec::decrypt_stream`].
pub enum CodecReader<R> {
    /// Bytes pass through unchanged.
    Plain(Sniffed<R>),
    /// Plaintext is being sealed into an envelope.
    Encrypt(EncryptReader<Sniffed<R>>),
    /// Envelope content is being opened.
    Decrypt(DecryptReader<Sniffed<R>>),
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Plain(r) => r.read(buf),
            CodecReader::Encrypt(r) => r.read(buf),
            CodecReader::Decrypt(r) => r.read(buf),
        }
    }
}

impl<R> CodecReader<R> {
    /// Whether this stream changes the bytes it reads.
    pub fn is_transforming(&self) -> bool {
        !matches!(self, CodecReader::Plain(_))
    }
}

impl Codec {
    /// Build a codec from an optional passphrase and the enabled flag.
    ///
    /// A missing or empty passphrase disables the codec even when the flag is set.
    pub fn from_settings(passphrase: Option<&str>, enabled: bool) -> Self {
        match (enabled, passphrase.filter(|p| !p.is_empty())) {
            (true, Some(passphrase)) => {
                let key = EnvelopeKey::from_passphrase(passphrase);
                debug!(fingerprint = %key.fingerprint(), "Encryption enabled");
                Codec::Enabled(key)
            }
            (true, None) => {
                warn!("Encryption requested without a key, content will be stored in plain");
                Codec::Disabled
            }
            (false, _) => Codec::Disabled,
        }
    }

    /// Whether content is sealed on write.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Codec::Enabled(_))
    }

    /// Sniff whether `reader` holds an envelope. Works in both states.
    pub fn is_encrypted<R: Read>(&self, reader: R) -> io::Result<bool> {
        let (encrypted, _) = sniff(reader)?;
        Ok(encrypted)
    }

    /// Sniff whether the file at `path` holds an envelope.
    pub fn is_encrypted_file(&self, path: &Path) -> io::Result<bool> {
        self.is_encrypted(File::open(path)?)
    }

    /// Wrap `reader` so it yields an envelope.
    ///
    /// Passes through when disabled or when the input is already encrypted.
    pub fn encrypt_stream<R: Read>(&self, reader: R) -> io::Result<CodecReader<R>> {
        let (encrypted, reader) = sniff(reader)?;
        Ok(match self {
            Codec::Enabled(key) if !encrypted => {
                CodecReader::Encrypt(EncryptReader::new(reader, key.clone()))
            }
            _ => CodecReader::Plain(reader),
        })
    }

    /// Wrap `reader` so it yields plaintext.
    ///
    /// Passes through when disabled or when the input is not encrypted.
    pub fn decrypt_stream<R: Read>(&self, reader: R) -> io::Result<CodecReader<R>> {
        let (encrypted, reader) = sniff(reader)?;
        Ok(match self {
            Codec::Enabled(key) if encrypted => {
                CodecReader::Decrypt(DecryptReader::new(reader, key.clone()))
            }
            _ => CodecReader::Plain(reader),
        })
    }

    /// Write `reader` to `path` through the encrypting transform, replacing
    /// any existing content. Returns the number of bytes written to disk.
    pub fn save_stream_to_file<R: Read>(&self, reader: R, path: &Path) -> io::Result<u64> {
        let mut source = self.encrypt_stream(reader)?;
        let mut file = File::create(path)?;
        let written = io::copy(&mut source, &mut file)?;
        file.flush()?;
        Ok(written)
    }

    /// Append `reader` to `path` as a new envelope, creating the file if needed.
    ///
    /// The appended bytes continue existing content, so they are always sealed
    /// when enabled, even if they happen to start with an envelope header.
    pub fn append_stream_to_file<R: Read>(&self, mut reader: R, path: &Path) -> io::Result<u64> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = match self {
            Codec::Enabled(key) => {
                io::copy(&mut EncryptReader::new(reader, key.clone()), &mut file)?
            }
            Codec::Disabled => io::copy(&mut reader, &mut file)?,
        };
        file.flush()?;
        Ok(written)
    }

    /// Encrypt an in-memory buffer.
    pub fn encrypt_bytes(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        self.encrypt_stream(data)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Decrypt an in-memory buffer.
    pub fn decrypt_bytes(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        self.decrypt_stream(data)?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Size of the file's content once decrypted, without decrypting it.
    ///
    /// Plain files report their on-disk length.
    pub fn plaintext_len(&self, path: &Path) -> io::Result<u64> {
        let on_disk = std::fs::metadata(path)?.len();
        if !self.is_encrypted_file(path)? {
            return Ok(on_disk);
        }
        let mut file = File::open(path)?;
        Ok(scan_plaintext_len(&mut file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{is_envelope, ENVELOPE_MAGIC, ENVELOPE_VERSION};

    fn enabled() -> Codec {
        Codec::from_settings(Some("codec-test"), true)
    }

    #[test]
    fn test_from_settings() {
        assert!(enabled().is_enabled());
        assert!(!Codec::from_settings(Some("key"), false).is_enabled());
        assert!(!Codec::from_settings(None, true).is_enabled());
        assert!(!Codec::from_settings(Some(""), true).is_enabled());
    }

    #[test]
    fn test_roundtrip_enabled() {
        let codec = enabled();
        for data in [&b""[..], b"x", b"some longer text with\0nul bytes"] {
            let sealed = codec.encrypt_bytes(data).unwrap();
            assert!(codec.is_encrypted(sealed.as_slice()).unwrap());
            assert_eq!(codec.decrypt_bytes(&sealed).unwrap(), data);
        }
    }

    #[test]
    fn test_disabled_is_identity() {
        let codec = Codec::Disabled;
        let data = b"plain bytes";
        assert_eq!(codec.encrypt_bytes(data).unwrap(), data);
        assert_eq!(codec.decrypt_bytes(data).unwrap(), data);
    }

    #[test]
    fn test_disabled_still_sniffs() {
        let sealed = enabled().encrypt_bytes(b"hidden").unwrap();
        let codec = Codec::Disabled;
        assert!(codec.is_encrypted(sealed.as_slice()).unwrap());
        // Disabled codec leaves sealed content alone.
        assert_eq!(codec.decrypt_bytes(&sealed).unwrap(), sealed);
    }

    #[test]
    fn test_plaintext_not_detected() {
        let codec = enabled();
        assert!(!codec.is_encrypted(&b"hello world"[..]).unwrap());
        assert!(!codec.is_encrypted(&b""[..]).unwrap());
        assert!(!codec.is_encrypted(&b"VFM"[..]).unwrap());
    }

    #[test]
    fn test_encrypt_is_idempotent() {
        let codec = enabled();
        let once = codec.encrypt_bytes(b"data").unwrap();
        let twice = codec.encrypt_bytes(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_decrypt_plain_is_passthrough() {
        let codec = enabled();
        let reader = codec.decrypt_stream(&b"not sealed"[..]).unwrap();
        assert!(!reader.is_transforming());
    }

    #[test]
    fn test_save_and_append_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        let codec = enabled();

        codec.save_stream_to_file(&b"part one "[..], &path).unwrap();
        codec.append_stream_to_file(&b"part two"[..], &path).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        assert!(is_envelope(&on_disk));
        assert_eq!(codec.decrypt_bytes(&on_disk).unwrap(), b"part one part two");
        assert_eq!(codec.plaintext_len(&path).unwrap(), 17);
        assert!(codec.is_encrypted_file(&path).unwrap());
    }

    #[test]
    fn test_append_seals_header_lookalike() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("upload.bin");
        let codec = enabled();

        let mut second = ENVELOPE_MAGIC.to_vec();
        second.push(ENVELOPE_VERSION);
        second.extend_from_slice(b" raw tail");

        codec.save_stream_to_file(&b"head "[..], &path).unwrap();
        codec.append_stream_to_file(second.as_slice(), &path).unwrap();

        let on_disk = std::fs::read(&path).unwrap();
        let mut expected = b"head ".to_vec();
        expected.extend_from_slice(&second);
        assert_eq!(codec.decrypt_bytes(&on_disk).unwrap(), expected);
        assert_eq!(codec.plaintext_len(&path).unwrap(), expected.len() as u64);
    }

    #[test]
    fn test_plaintext_len_plain_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plain.bin");
        std::fs::write(&path, vec![0u8; 300]).unwrap();
        assert_eq!(enabled().plaintext_len(&path).unwrap(), 300);
        assert_eq!(Codec::Disabled.plaintext_len(&path).unwrap(), 300);
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f");
        let codec = Codec::Disabled;
        codec.save_stream_to_file(&b"long original content"[..], &path).unwrap();
        codec.save_stream_to_file(&b"short"[..], &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }
}
