//! Streaming encryption and decryption over `std::io::Read`.
//!
//! [`EncryptReader`] wraps a plaintext reader and yields envelope bytes;
//! [`DecryptReader`] does the reverse. Both hold at most one chunk in memory.

use std::io::{self, Chain, Cursor, Read, Seek, SeekFrom};

use crate::error::{CodecError, Result};
use crate::framing::{
    is_envelope, ChunkFlags, ChunkHeader, EnvelopeHeader, CHUNK_HEADER_SIZE, CHUNK_SIZE,
    HEADER_SIZE, SNIFF_SIZE, TAG_SIZE,
};
use crate::key::EnvelopeKey;

/// A reader whose first bytes were consumed for inspection and put back.
pub type Sniffed<R> = Chain<Cursor<Vec<u8>>, R>;

/// Reads the envelope prefix of `reader` and reports whether it is encrypted.
///
/// The returned reader yields the complete original stream.
pub fn sniff<R: Read>(mut reader: R) -> io::Result<(bool, Sniffed<R>)> {
    let mut prefix = vec![0u8; SNIFF_SIZE];
    let n = read_full(&mut reader, &mut prefix)?;
    prefix.truncate(n);
    let encrypted = is_envelope(&prefix);
    Ok((encrypted, Cursor::new(prefix).chain(reader)))
}

/// Fill `buf` from `reader` until full or end of input.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Output bytes produced but not yet handed to the caller.
#[derive(Default)]
struct Pending {
    buf: Vec<u8>,
    pos: usize,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn replace(&mut self, buf: Vec<u8>) {
        self.buf = buf;
        self.pos = 0;
    }

    fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Produces a single envelope from a plaintext reader.
pub struct EncryptReader<R> {
    inner: R,
    key: EnvelopeKey,
    header: EnvelopeHeader,
    counter: u32,
    lookahead: Vec<u8>,
    pending: Pending,
    started: bool,
    finished: bool,
}

impl<R: Read> EncryptReader<R> {
    /// Create an encrypting reader with a fresh nonce prefix.
    pub fn new(inner: R, key: EnvelopeKey) -> Self {
        Self {
            inner,
            key,
            header: EnvelopeHeader::generate(),
            counter: 0,
            lookahead: Vec::with_capacity(CHUNK_SIZE + 1),
            pending: Pending::default(),
            started: false,
            finished: false,
        }
    }

    /// Seal the next chunk into the pending buffer.
    fn next_chunk(&mut self) -> Result<()> {
        // One byte beyond a full chunk tells us whether more input follows.
        let want = CHUNK_SIZE + 1;
        let have = self.lookahead.len();
        self.lookahead.resize(want, 0);
        let n = read_full(&mut self.inner, &mut self.lookahead[have..])?;
        self.lookahead.truncate(have + n);

        let last = self.lookahead.len() <= CHUNK_SIZE;
        let take = self.lookahead.len().min(CHUNK_SIZE);
        let nonce = self.header.chunk_nonce(self.counter, last);
        let sealed = self.key.seal(&nonce, &self.lookahead[..take])?;
        self.lookahead.drain(..take);

        let frame = ChunkHeader {
            flags: ChunkFlags::default().with_final(last),
            len: sealed.len() as u32,
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + CHUNK_HEADER_SIZE + sealed.len());
        if !self.started {
            out.extend_from_slice(&self.header.encode());
            self.started = true;
        }
        out.extend_from_slice(&frame.encode());
        out.extend_from_slice(&sealed);
        self.pending.replace(out);

        if last {
            self.finished = true;
        } else {
            self.counter = self
                .counter
                .checked_add(1)
                .ok_or(CodecError::TooManyChunks)?;
        }
        Ok(())
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            if self.finished {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        Ok(self.pending.drain_into(buf))
    }
}

/// Recovers plaintext from one or more concatenated envelopes.
pub struct DecryptReader<R> {
    inner: R,
    key: EnvelopeKey,
    header: Option<EnvelopeHeader>,
    counter: u32,
    envelopes: usize,
    pending: Pending,
    finished: bool,
}

impl<R: Read> DecryptReader<R> {
    /// Create a decrypting reader. The stream must begin with an envelope header.
    pub fn new(inner: R, key: EnvelopeKey) -> Self {
        Self {
            inner,
            key,
            header: None,
            counter: 0,
            envelopes: 0,
            pending: Pending::default(),
            finished: false,
        }
    }

    /// Number of envelopes fully or partially consumed so far.
    pub fn envelopes_read(&self) -> usize {
        self.envelopes
    }

    /// Open the next chunk, reading a new envelope header when needed.
    fn next_chunk(&mut self) -> Result<()> {
        let header = match self.header {
            Some(header) => header,
            None => {
                let mut raw = [0u8; HEADER_SIZE];
                let n = read_full(&mut self.inner, &mut raw)?;
                if n == 0 && self.envelopes > 0 {
                    self.finished = true;
                    return Ok(());
                }
                let header = EnvelopeHeader::decode(&raw[..n])?;
                self.header = Some(header);
                self.counter = 0;
                self.envelopes += 1;
                header
            }
        };

        let mut raw = [0u8; CHUNK_HEADER_SIZE];
        if read_full(&mut self.inner, &mut raw)? < CHUNK_HEADER_SIZE {
            return Err(CodecError::Truncated("missing final chunk"));
        }
        let frame = ChunkHeader::decode(&raw)?;

        let mut sealed = vec![0u8; frame.len as usize];
        if read_full(&mut self.inner, &mut sealed)? < sealed.len() {
            return Err(CodecError::Truncated("chunk body"));
        }

        let last = frame.flags.is_final();
        let nonce = header.chunk_nonce(self.counter, last);
        let plain = self.key.open(&nonce, &sealed)?;
        self.pending.replace(plain);

        if last {
            self.header = None;
        } else {
            self.counter = self
                .counter
                .checked_add(1)
                .ok_or(CodecError::TooManyChunks)?;
        }
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Empty chunks are legal, so keep pulling until there is output.
        while self.pending.is_empty() {
            if self.finished {
                return Ok(0);
            }
            self.next_chunk()?;
        }
        Ok(self.pending.drain_into(buf))
    }
}

/// Sum the plaintext length of every envelope in `reader` by walking chunk
/// headers. No decryption takes place. The reader is left at end of input.
pub fn scan_plaintext_len<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    let start = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(start))?;

    let mut total = 0u64;
    let mut offset = start;
    let mut envelopes = 0usize;

    while offset < end || envelopes == 0 {
        let mut raw = [0u8; HEADER_SIZE];
        let n = read_full(reader, &mut raw)?;
        EnvelopeHeader::decode(&raw[..n])?;
        offset += HEADER_SIZE as u64;
        envelopes += 1;

        loop {
            let mut raw = [0u8; CHUNK_HEADER_SIZE];
            if read_full(reader, &mut raw)? < CHUNK_HEADER_SIZE {
                return Err(CodecError::Truncated("missing final chunk"));
            }
            let frame = ChunkHeader::decode(&raw)?;
            offset += CHUNK_HEADER_SIZE as u64 + u64::from(frame.len);
            if offset > end {
                return Err(CodecError::Truncated("chunk body"));
            }
            reader.seek(SeekFrom::Start(offset))?;
            total += (frame.len as usize - TAG_SIZE) as u64;
            if frame.flags.is_final() {
                break;
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EnvelopeKey {
        EnvelopeKey::from_passphrase("stream-test")
    }

    fn encrypt(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        EncryptReader::new(data, key()).read_to_end(&mut out).unwrap();
        out
    }

    fn decrypt(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        DecryptReader::new(data, key()).read_to_end(&mut out)?;
        Ok(out)
    }

    /// Reader that hands out one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn test_encrypt_decrypt_small() {
        let sealed = encrypt(b"hello vault");
        assert!(is_envelope(&sealed));
        assert_eq!(decrypt(&sealed).unwrap(), b"hello vault");
    }

    #[test]
    fn test_empty_input_is_single_final_chunk() {
        let sealed = encrypt(b"");
        assert_eq!(sealed.len(), HEADER_SIZE + CHUNK_HEADER_SIZE + TAG_SIZE);
        assert!(decrypt(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_exact_chunk_boundary() {
        let data = vec![0x5Au8; CHUNK_SIZE * 2];
        let sealed = encrypt(&data);
        let expected = HEADER_SIZE + 2 * (CHUNK_HEADER_SIZE + CHUNK_SIZE + TAG_SIZE);
        assert_eq!(sealed.len(), expected);
        assert_eq!(decrypt(&sealed).unwrap(), data);
    }

    #[test]
    fn test_multi_chunk_with_trickling_source() {
        let data: Vec<u8> = (0..(CHUNK_SIZE + 777)).map(|i| (i % 251) as u8).collect();
        let mut sealed = Vec::new();
        EncryptReader::new(Trickle(&data), key())
            .read_to_end(&mut sealed)
            .unwrap();
        let mut out = Vec::new();
        DecryptReader::new(Trickle(&sealed), key())
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_concatenated_envelopes() {
        let mut sealed = encrypt(b"first part, ");
        sealed.extend(encrypt(b""));
        sealed.extend(encrypt(b"second part"));
        let mut reader = DecryptReader::new(sealed.as_slice(), key());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"first part, second part");
        assert_eq!(reader.envelopes_read(), 3);
    }

    #[test]
    fn test_truncated_envelope_fails() {
        let sealed = encrypt(&vec![1u8; CHUNK_SIZE + 10]);
        let cut = &sealed[..sealed.len() - 20];
        let err = decrypt(cut).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_dropped_final_chunk_fails() {
        let data = vec![2u8; CHUNK_SIZE + 10];
        let sealed = encrypt(&data);
        let first_chunk_end = HEADER_SIZE + CHUNK_HEADER_SIZE + CHUNK_SIZE + TAG_SIZE;
        assert!(decrypt(&sealed[..first_chunk_end]).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt(b"do not touch");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let err = decrypt(&sealed).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_forged_final_flag_fails() {
        let data = vec![3u8; CHUNK_SIZE + 10];
        let mut sealed = encrypt(&data);
        // Mark the first chunk as final so the tail looks like a new envelope.
        sealed[HEADER_SIZE] |= ChunkFlags::FINAL;
        assert!(decrypt(&sealed).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret");
        let mut out = Vec::new();
        let result = DecryptReader::new(sealed.as_slice(), EnvelopeKey::from_passphrase("other"))
            .read_to_end(&mut out);
        assert!(result.is_err());
    }

    #[test]
    fn test_sniff_restores_stream() {
        let sealed = encrypt(b"abc");
        let (encrypted, mut reader) = sniff(sealed.as_slice()).unwrap();
        assert!(encrypted);
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, sealed);

        let (encrypted, mut reader) = sniff(&b"ab"[..]).unwrap();
        assert!(!encrypted);
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"ab");
    }

    #[test]
    fn test_scan_plaintext_len() {
        let mut sealed = encrypt(&vec![9u8; CHUNK_SIZE + 100]);
        sealed.extend(encrypt(b"tail"));
        let mut cursor = Cursor::new(sealed);
        let len = scan_plaintext_len(&mut cursor).unwrap();
        assert_eq!(len, (CHUNK_SIZE + 104) as u64);
    }

    #[test]
    fn test_scan_plaintext_len_rejects_truncation() {
        let sealed = encrypt(b"some content");
        let mut cursor = Cursor::new(sealed[..sealed.len() - 3].to_vec());
        assert!(matches!(
            scan_plaintext_len(&mut cursor),
            Err(CodecError::Truncated(_))
        ));
    }
}
