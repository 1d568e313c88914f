//! Digest/MAC engine: SHA-2, SHA-3 and BLAKE3 behind one selector
//!
//! Every primitive is used as a pure function of its inputs. The only state a
//! `DigestType` carries is the algorithm choice itself, so unsupported ids are
//! rejected when a mode is decoded, never halfway through a stream.

use gordian_core::{GordianError, GordianResult};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use sha3::{Sha3_256, Sha3_512};

/// BLAKE3 derive-key context for condensing arbitrary MAC keys to 32 bytes.
const BLAKE3_MAC_CONTEXT: &str = "gordian-knot 2024-01-01 mac key";
/// BLAKE3 derive-key context for key expansion.
const BLAKE3_EXPAND_CONTEXT: &str = "gordian-knot 2024-01-01 expand";

/// Supported digest algorithms. The discriminant is the on-disk nibble id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DigestType {
    Sha256 = 1,
    Sha512 = 2,
    Sha3_256 = 3,
    Sha3_512 = 4,
    Blake3 = 5,
}

impl DigestType {
    pub const ALL: [DigestType; 5] = [
        DigestType::Sha256,
        DigestType::Sha512,
        DigestType::Sha3_256,
        DigestType::Sha3_512,
        DigestType::Blake3,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> GordianResult<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.id() == id)
            .ok_or_else(|| GordianError::config(format!("unsupported digest id {id}")))
    }

    /// Digest output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestType::Sha256 | DigestType::Sha3_256 | DigestType::Blake3 => 32,
            DigestType::Sha512 | DigestType::Sha3_512 => 64,
        }
    }

    /// Unkeyed digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Keyed digest (HMAC, or BLAKE3 keyed mode) of `data`.
    pub fn mac(self, key: &[u8], data: &[u8]) -> GordianResult<Vec<u8>> {
        let mut mac = self.mac_engine(key)?;
        mac.update(data);
        Ok(mac.finalize())
    }

    pub fn hasher(self) -> Hasher {
        match self {
            DigestType::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestType::Sha512 => Hasher::Sha512(Sha512::new()),
            DigestType::Sha3_256 => Hasher::Sha3_256(Sha3_256::new()),
            DigestType::Sha3_512 => Hasher::Sha3_512(Sha3_512::new()),
            DigestType::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn mac_engine(self, key: &[u8]) -> GordianResult<MacEngine> {
        let invalid = |e: hmac::digest::InvalidLength| GordianError::crypto(format!("MAC init: {e}"));
        Ok(match self {
            DigestType::Sha256 => {
                MacEngine::Sha256(<Hmac<Sha256> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            DigestType::Sha512 => {
                MacEngine::Sha512(<Hmac<Sha512> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            DigestType::Sha3_256 => {
                MacEngine::Sha3_256(<Hmac<Sha3_256> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            DigestType::Sha3_512 => {
                MacEngine::Sha3_512(<Hmac<Sha3_512> as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            DigestType::Blake3 => {
                let condensed = blake3::derive_key(BLAKE3_MAC_CONTEXT, key);
                MacEngine::Blake3(Box::new(blake3::Hasher::new_keyed(&condensed)))
            }
        })
    }

    /// Expand `ikm` into `out` under a domain-specific `info` label.
    ///
    /// HKDF for the SHA families, BLAKE3 derive-key XOF for BLAKE3.
    pub fn expand(self, ikm: &[u8], info: &[u8], out: &mut [u8]) -> GordianResult<()> {
        let failed = |e: hkdf::InvalidLength| GordianError::crypto(format!("HKDF expand failed: {e}"));
        match self {
            DigestType::Sha256 => Hkdf::<Sha256>::new(None, ikm).expand(info, out).map_err(failed),
            DigestType::Sha512 => Hkdf::<Sha512>::new(None, ikm).expand(info, out).map_err(failed),
            DigestType::Sha3_256 => {
                Hkdf::<Sha3_256>::new(None, ikm).expand(info, out).map_err(failed)
            }
            DigestType::Sha3_512 => {
                Hkdf::<Sha3_512>::new(None, ikm).expand(info, out).map_err(failed)
            }
            DigestType::Blake3 => {
                let mut hasher = blake3::Hasher::new_derive_key(BLAKE3_EXPAND_CONTEXT);
                hasher.update(&(info.len() as u64).to_be_bytes());
                hasher.update(info);
                hasher.update(ikm);
                hasher.finalize_xof().fill(out);
                Ok(())
            }
        }
    }
}

/// Incremental unkeyed digest.
#[derive(Clone)]
pub enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Sha3_256(Sha3_256),
    Sha3_512(Sha3_512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => Digest::update(h, data),
            Hasher::Sha512(h) => Digest::update(h, data),
            Hasher::Sha3_256(h) => Digest::update(h, data),
            Hasher::Sha3_512(h) => Digest::update(h, data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Sha3_256(h) => h.finalize().to_vec(),
            Hasher::Sha3_512(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Incremental keyed digest.
#[derive(Clone)]
pub enum MacEngine {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
    Sha3_256(Hmac<Sha3_256>),
    Sha3_512(Hmac<Sha3_512>),
    Blake3(Box<blake3::Hasher>),
}

impl MacEngine {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            MacEngine::Sha256(m) => m.update(data),
            MacEngine::Sha512(m) => m.update(data),
            MacEngine::Sha3_256(m) => m.update(data),
            MacEngine::Sha3_512(m) => m.update(data),
            MacEngine::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            MacEngine::Sha256(m) => m.finalize().into_bytes().to_vec(),
            MacEngine::Sha512(m) => m.finalize().into_bytes().to_vec(),
            MacEngine::Sha3_256(m) => m.finalize().into_bytes().to_vec(),
            MacEngine::Sha3_512(m) => m.finalize().into_bytes().to_vec(),
            MacEngine::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}
