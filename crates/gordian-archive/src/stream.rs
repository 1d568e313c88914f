//! Read-side stream layers: digest verification and segmented decryption
//!
//! Layers nest the reverse of the write pipeline:
//!
//! ```text
//! container bytes ─► Digest(enc) ─► Decrypt ─► Digest(comp) ─► zstd ─► Digest(raw) ─► caller
//! ```
//!
//! Every layer reports failures as `io::Error` wrapping a [`GordianError`],
//! which [`GordianError::from_io`] recovers at the archive boundary.

use std::io::{self, Read};

use gordian_core::GordianError;
use gordian_crypto::digest::Hasher;
use gordian_crypto::{DigestType, StreamDecryptor};

use crate::entry::Measure;

/// Hashes everything read through it and checks digest and length at EOF.
///
/// Bytes are handed out before the final check, so a caller must read to EOF
/// and see `Ok(0)` before trusting what it got. Once a check fails every later
/// read fails too.
pub struct DigestReader<R> {
    inner: R,
    layer: &'static str,
    hasher: Option<Hasher>,
    expected: Measure,
    seen: u64,
    failed: Option<String>,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R, layer: &'static str, digest: DigestType, expected: Measure) -> Self {
        Self {
            inner,
            layer,
            hasher: Some(digest.hasher()),
            expected,
            seen: 0,
            failed: None,
        }
    }

    fn fail(&mut self, what: &str) -> io::Error {
        tracing::warn!(layer = self.layer, "{what} mismatch");
        let message = format!("{} {what} mismatch", self.layer);
        self.hasher = None;
        self.failed = Some(message.clone());
        GordianError::integrity(message).into_io()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(cause) = &self.failed {
            return Err(failed_before(self.layer, cause));
        }
        if self.hasher.is_none() {
            return Ok(0);
        }
        let n = match self.inner.read(buf) {
            Ok(n) => n,
            Err(err) => return Err(latch(&mut self.failed, err)),
        };
        if n == 0 {
            if self.seen != self.expected.length {
                return Err(self.fail("length"));
            }
            let digest = match self.hasher.take() {
                Some(hasher) => hasher.finalize(),
                None => return Ok(0),
            };
            if digest != self.expected.digest {
                return Err(self.fail("digest"));
            }
            return Ok(0);
        }
        self.seen += n as u64;
        if self.seen > self.expected.length {
            return Err(self.fail("length"));
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// Record a failure from below. Interrupted reads stay retryable.
fn latch(failed: &mut Option<String>, err: io::Error) -> io::Error {
    if err.kind() != io::ErrorKind::Interrupted {
        *failed = Some(err.to_string());
    }
    err
}

fn failed_before(layer: &str, cause: &str) -> io::Error {
    GordianError::integrity(format!("{layer} stream already failed: {cause}")).into_io()
}

const READ_CHUNK: usize = 16 * 1024;

/// Feeds framed ciphertext through a [`StreamDecryptor`].
///
/// A rejected frame, a missing final frame or a failing source latches the
/// reader; it never reports a clean EOF afterwards.
pub struct DecryptReader<R> {
    inner: R,
    decryptor: Option<StreamDecryptor>,
    plain: Vec<u8>,
    pos: usize,
    chunk: Vec<u8>,
    failed: Option<String>,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, decryptor: StreamDecryptor) -> Self {
        Self {
            inner,
            decryptor: Some(decryptor),
            plain: Vec::new(),
            pos: 0,
            chunk: vec![0u8; READ_CHUNK],
            failed: None,
        }
    }

    fn fail(&mut self, err: GordianError) -> io::Error {
        self.decryptor = None;
        self.plain.clear();
        self.pos = 0;
        self.failed = Some(err.to_string());
        err.into_io()
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(cause) = &self.failed {
            return Err(failed_before("decrypted", cause));
        }
        while self.pos == self.plain.len() {
            if self.decryptor.is_none() {
                return Ok(0);
            }
            let n = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) => return Err(latch(&mut self.failed, err)),
            };
            if n == 0 {
                if let Some(decryptor) = self.decryptor.take() {
                    if let Err(err) = decryptor.finish() {
                        return Err(self.fail(err));
                    }
                }
                return Ok(0);
            }
            let update = match self.decryptor.as_mut() {
                Some(decryptor) => decryptor.update(&self.chunk[..n]),
                None => return Ok(0),
            };
            match update {
                Ok(plain) => {
                    self.plain = plain;
                    self.pos = 0;
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gordian_crypto::{SymKeyType, SymmetricKey};

    fn measure(data: &[u8]) -> Measure {
        Measure {
            digest: DigestType::Blake3.digest(data),
            length: data.len() as u64,
        }
    }

    fn read_all(reader: impl Read) -> Result<Vec<u8>, GordianError> {
        let mut reader = reader;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).map_err(GordianError::from_io)?;
        Ok(out)
    }

    #[test]
    fn digest_reader_passes_matching_stream() {
        let data = b"measured bytes".to_vec();
        let reader = DigestReader::new(&data[..], "raw", DigestType::Blake3, measure(&data));
        assert_eq!(read_all(reader).unwrap(), data);
    }

    #[test]
    fn digest_reader_rejects_wrong_digest() {
        let data = b"measured bytes";
        let mut expected = measure(data);
        expected.digest[0] ^= 1;
        let reader = DigestReader::new(&data[..], "raw", DigestType::Blake3, expected);
        assert!(matches!(read_all(reader), Err(GordianError::Integrity(_))));
    }

    #[test]
    fn digest_reader_rejects_short_and_long_streams() {
        let data = b"measured bytes";
        let reader = DigestReader::new(&data[..5], "raw", DigestType::Blake3, measure(data));
        assert!(matches!(read_all(reader), Err(GordianError::Integrity(_))));

        let mut longer = data.to_vec();
        longer.push(b'!');
        let reader = DigestReader::new(&longer[..], "raw", DigestType::Blake3, measure(data));
        assert!(matches!(read_all(reader), Err(GordianError::Integrity(_))));
    }

    fn assert_latched(mut reader: impl Read) {
        let mut buf = [0u8; 64];
        for _ in 0..3 {
            let err = reader.read(&mut buf).unwrap_err();
            assert!(matches!(GordianError::from_io(err), GordianError::Integrity(_)));
        }
    }

    #[test]
    fn digest_reader_stays_failed_after_mismatch() {
        let expected = Measure {
            digest: vec![0u8; 32],
            length: 5,
        };
        let mut reader = DigestReader::new(&b"hello"[..], "raw", DigestType::Blake3, expected);
        assert!(matches!(read_all(&mut reader), Err(GordianError::Integrity(_))));
        assert_latched(reader);

        let data = b"measured bytes";
        let mut reader = DigestReader::new(&data[..], "raw", DigestType::Blake3, measure(&data[..4]));
        assert!(matches!(read_all(&mut reader), Err(GordianError::Integrity(_))));
        assert_latched(reader);
    }

    #[test]
    fn digest_reader_stays_failed_after_inner_failure() {
        let data = b"payload";
        let mut expected = measure(data);
        expected.digest[0] ^= 1;
        let inner = DigestReader::new(&data[..], "compressed", DigestType::Blake3, expected);
        let mut outer = DigestReader::new(inner, "raw", DigestType::Blake3, measure(data));
        assert!(read_all(&mut outer).is_err());
        assert_latched(outer);
    }

    fn sealed(key: &SymmetricKey, data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let (mut encryptor, iv) = key.init_encryption_stream(1024).unwrap();
        let mut out = encryptor.update(data).unwrap();
        out.extend(encryptor.finish().unwrap());
        (out, iv)
    }

    #[test]
    fn decrypt_reader_roundtrip() {
        let key = SymmetricKey::generate(SymKeyType::AesGcm, false);
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let (ciphertext, iv) = sealed(&key, &data);
        let reader = DecryptReader::new(&ciphertext[..], key.init_decryption_stream(&iv).unwrap());
        assert_eq!(read_all(reader).unwrap(), data);
    }

    #[test]
    fn decrypt_reader_rejects_truncation() {
        let key = SymmetricKey::generate(SymKeyType::XChaCha20Poly1305, false);
        let (ciphertext, iv) = sealed(&key, &[7u8; 3000]);
        let cut = &ciphertext[..ciphertext.len() - 10];
        let mut reader = DecryptReader::new(cut, key.init_decryption_stream(&iv).unwrap());
        assert!(matches!(read_all(&mut reader), Err(GordianError::Integrity(_))));
        assert_latched(reader);
    }

    #[test]
    fn decrypt_reader_stays_failed_after_tampering() {
        let key = SymmetricKey::generate(SymKeyType::AesGcm, false);
        let (mut ciphertext, iv) = sealed(&key, &[9u8; 5000]);
        let middle = ciphertext.len() / 2;
        ciphertext[middle] ^= 0x01;
        let mut reader = DecryptReader::new(&ciphertext[..], key.init_decryption_stream(&iv).unwrap());
        assert!(matches!(read_all(&mut reader), Err(GordianError::Integrity(_))));
        assert_latched(reader);
    }
}
