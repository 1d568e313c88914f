//! Needle: self-describing binary encoding for key material
//!
//! ```text
//! [4 bytes: KeyMode, u32 BE][1 byte: blob count]{[2 bytes: length, u16 BE][length bytes]}*
//! ```
//!
//! An absent blob is encoded with length 0. Decoding is strict: a short prefix,
//! a length running past the buffer, trailing bytes or an unexpected blob count
//! are all `Data` errors.

use gordian_core::{GordianError, GordianResult};

use crate::keymode::{AsymKeyMode, HashMode, KeyMode, SymKeyMode, KEY_MODE_BYTES};

/// Mode plus blob count.
pub const NEEDLE_PREFIX: usize = KEY_MODE_BYTES + 1;

/// Upper bound on an encoded public key definition.
pub const MAX_ASYM_NEEDLE: usize = 512;

/// Upper bound on encoded password hash bytes.
pub const MAX_HASH_NEEDLE: usize = 128;

/// A decoded needle: mode plus its blobs in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    pub mode: KeyMode,
    pub blobs: Vec<Vec<u8>>,
}

pub fn encode(mode: KeyMode, blobs: &[&[u8]]) -> GordianResult<Vec<u8>> {
    let count = u8::try_from(blobs.len())
        .map_err(|_| GordianError::config(format!("needle cannot hold {} blobs", blobs.len())))?;

    let body: usize = blobs.iter().map(|b| 2 + b.len()).sum();
    let mut out = Vec::with_capacity(NEEDLE_PREFIX + body);
    out.extend_from_slice(&mode.to_bytes());
    out.push(count);
    for blob in blobs {
        let len = u16::try_from(blob.len())
            .map_err(|_| GordianError::config(format!("needle blob of {} bytes", blob.len())))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(blob);
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> GordianResult<Needle> {
    let mut reader = ByteReader::new(bytes);
    let mode = KeyMode::from_bytes(reader.take(KEY_MODE_BYTES)?)?;
    let count = reader.u8()?;

    let mut blobs = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let len = reader.u16()?;
        blobs.push(reader.take(usize::from(len))?.to_vec());
    }
    reader.finish()?;
    Ok(Needle { mode, blobs })
}

/// Decode and insist on exactly `count` blobs.
pub fn decode_exact(bytes: &[u8], count: usize) -> GordianResult<Needle> {
    let needle = decode(bytes)?;
    if needle.blobs.len() != count {
        return Err(GordianError::data(format!(
            "needle carries {} blobs, expected {count}",
            needle.blobs.len()
        )));
    }
    Ok(needle)
}

/// `[AsymKeyMode][public key]`, the shareable definition of a key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsymModeNeedle {
    pub mode: AsymKeyMode,
    pub public_key: Vec<u8>,
}

impl AsymModeNeedle {
    pub fn encode(&self) -> GordianResult<Vec<u8>> {
        let out = encode(self.mode.key_mode(), &[&self.public_key])?;
        if out.len() > MAX_ASYM_NEEDLE {
            return Err(GordianError::config(format!(
                "public key definition of {} bytes exceeds {MAX_ASYM_NEEDLE}",
                out.len()
            )));
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> GordianResult<Self> {
        if bytes.len() > MAX_ASYM_NEEDLE {
            return Err(GordianError::data(format!(
                "public key definition of {} bytes exceeds {MAX_ASYM_NEEDLE}",
                bytes.len()
            )));
        }
        let Needle { mode, mut blobs } = decode_exact(bytes, 1)?;
        Ok(Self {
            mode: AsymKeyMode::from_key_mode(mode)?,
            public_key: blobs.remove(0),
        })
    }
}

/// `[HashMode][salt][combined digest]`, the stored form of a password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashModeNeedle {
    pub mode: HashMode,
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
}

impl HashModeNeedle {
    pub fn encode(&self) -> GordianResult<Vec<u8>> {
        let out = encode(self.mode.key_mode(), &[&self.salt, &self.hash])?;
        if out.len() > MAX_HASH_NEEDLE {
            return Err(GordianError::config(format!(
                "hash bytes of {} bytes exceed {MAX_HASH_NEEDLE}",
                out.len()
            )));
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> GordianResult<Self> {
        if bytes.len() > MAX_HASH_NEEDLE {
            return Err(GordianError::data(format!(
                "hash bytes of {} bytes exceed {MAX_HASH_NEEDLE}",
                bytes.len()
            )));
        }
        let Needle { mode, blobs } = decode_exact(bytes, 2)?;
        let mut blobs = blobs.into_iter();
        let (Some(salt), Some(hash)) = (blobs.next(), blobs.next()) else {
            return Err(GordianError::data("hash needle is missing salt or digest"));
        };
        if salt.is_empty() || hash.is_empty() {
            return Err(GordianError::data("hash needle has an empty salt or digest"));
        }
        Ok(Self {
            mode: HashMode::from_key_mode(mode)?,
            salt,
            hash,
        })
    }
}

/// `[SymKeyMode][wrapped key]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymKeyNeedle {
    pub mode: SymKeyMode,
    pub wrapped: Vec<u8>,
}

impl SymKeyNeedle {
    pub fn encode(&self) -> GordianResult<Vec<u8>> {
        encode(self.mode.key_mode(), &[&self.wrapped])
    }

    pub fn decode(bytes: &[u8]) -> GordianResult<Self> {
        let Needle { mode, mut blobs } = decode_exact(bytes, 1)?;
        Ok(Self {
            mode: SymKeyMode::from_key_mode(mode)?,
            wrapped: blobs.remove(0),
        })
    }
}

/// Big-endian cursor over a byte slice. Every short read is a `Data` error.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn take(&mut self, len: usize) -> GordianResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(GordianError::data(format!(
                "truncated input: need {len} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> GordianResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> GordianResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> GordianResult<u16> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn u32(&mut self) -> GordianResult<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn u64(&mut self) -> GordianResult<u64> {
        self.array().map(u64::from_be_bytes)
    }

    /// `u16` length followed by that many bytes.
    pub fn short_blob(&mut self) -> GordianResult<&'a [u8]> {
        let len = self.u16()?;
        self.take(usize::from(len))
    }

    /// `u32` length followed by that many bytes.
    pub fn long_blob(&mut self) -> GordianResult<&'a [u8]> {
        let len = self.u32()?;
        self.take(len as usize)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> GordianResult<()> {
        if self.remaining() != 0 {
            return Err(GordianError::data(format!(
                "{} trailing bytes after offset {}",
                self.remaining(),
                self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asymmetric::AsymKeyType;
    use crate::digest::DigestType;
    use crate::keymode::{CipherSelection, Hardening};
    use crate::symmetric::SymKeyType;
    use proptest::prelude::*;

    fn hash_mode() -> HashMode {
        HashMode::new(
            DigestType::Sha256,
            DigestType::Sha3_512,
            CipherSelection::all(),
            [3, 4, 5],
            Hardening::None,
        )
        .unwrap()
    }

    #[test]
    fn layout_is_mode_count_then_prefixed_blobs() {
        let mode = KeyMode::from_packed(0x0123_1000).unwrap();
        let out = encode(mode, &[b"ab", b""]).unwrap();
        assert_eq!(out, vec![0x01, 0x23, 0x10, 0x00, 2, 0, 2, b'a', b'b', 0, 0]);
    }

    #[test]
    fn absent_blob_roundtrips_as_empty() {
        let mode = hash_mode().key_mode();
        let out = encode(mode, &[b"", b"x"]).unwrap();
        let needle = decode(&out).unwrap();
        assert_eq!(needle.blobs, vec![Vec::new(), b"x".to_vec()]);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut out = encode(hash_mode().key_mode(), &[b"salt"]).unwrap();
        out.push(0);
        assert!(matches!(decode(&out), Err(GordianError::Data(_))));
    }

    #[test]
    fn rejects_wrong_blob_count() {
        let out = encode(hash_mode().key_mode(), &[b"salt"]).unwrap();
        assert!(matches!(decode_exact(&out, 2), Err(GordianError::Data(_))));
    }

    #[test]
    fn hash_needle_bounds() {
        let needle = HashModeNeedle {
            mode: hash_mode(),
            salt: vec![7; 32],
            hash: vec![9; 64],
        };
        let out = needle.encode().unwrap();
        assert!(out.len() <= MAX_HASH_NEEDLE);
        assert_eq!(HashModeNeedle::decode(&out).unwrap(), needle);

        let oversized = HashModeNeedle {
            hash: vec![9; 120],
            ..needle
        };
        assert!(matches!(oversized.encode(), Err(GordianError::Config(_))));
        assert!(matches!(
            HashModeNeedle::decode(&[0u8; MAX_HASH_NEEDLE + 1]),
            Err(GordianError::Data(_))
        ));
    }

    #[test]
    fn asym_needle_bounds() {
        let mode = AsymKeyMode::new(AsymKeyType::Curve25519, DigestType::Blake3, CipherSelection::all());
        let needle = AsymModeNeedle {
            mode,
            public_key: vec![1; 64],
        };
        assert_eq!(AsymModeNeedle::decode(&needle.encode().unwrap()).unwrap(), needle);

        let oversized = AsymModeNeedle {
            mode,
            public_key: vec![1; 600],
        };
        assert!(matches!(oversized.encode(), Err(GordianError::Config(_))));
    }

    #[test]
    fn sym_needle_roundtrip() {
        let needle = SymKeyNeedle {
            mode: SymKeyMode {
                key_type: SymKeyType::AesSiv,
                restricted: false,
            },
            wrapped: vec![5; 80],
        };
        assert_eq!(SymKeyNeedle::decode(&needle.encode().unwrap()).unwrap(), needle);
    }

    #[test]
    fn byte_reader_reports_truncation() {
        let mut reader = ByteReader::new(&[0, 5, 1, 2]);
        assert!(matches!(reader.short_blob(), Err(GordianError::Data(_))));
    }

    proptest! {
        #[test]
        fn roundtrip_and_truncation(
            blobs in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..5),
        ) {
            let mode = hash_mode().key_mode();
            let refs: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
            let out = encode(mode, &refs).unwrap();

            let needle = decode(&out).unwrap();
            prop_assert_eq!(needle.mode, mode);
            prop_assert_eq!(&needle.blobs, &blobs);

            for cut in 0..out.len() {
                prop_assert!(matches!(decode(&out[..cut]), Err(GordianError::Data(_))));
            }
        }
    }
}
