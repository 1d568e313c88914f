//! Symmetric keys, deterministic data ciphers and segmented stream ciphers
//!
//! Data cipher output:
//! ```text
//! AES-SIV:           [ciphertext][16-byte tag]              (zero nonce)
//! AES-GCM, XChaCha:  [nonce][ciphertext][16-byte tag]       (nonce = keyed BLAKE3 of plaintext)
//! ```
//!
//! Stream frames:
//! ```text
//! [4 bytes: u32 BE, bit 31 = final, low 31 bits = sealed length][sealed segment]
//! nonce_i = IV with its first 8 bytes XOR i (LE)
//! AAD_i   = i (8 bytes, big-endian) || final flag (1 byte)
//! ```
//! The AAD binds every segment to its position and marks the last one, so
//! reordering, dropping or truncating segments is detected.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_siv::{Aes128SivAead, Aes256SivAead};
use chacha20poly1305::aead::{Aead, Error as AeadError, KeyInit, Nonce, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use gordian_core::{GordianError, GordianResult};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::keymode::SymKeyMode;

/// Size of an AEAD authentication tag (all supported algorithms).
pub const TAG_SIZE: usize = 16;

/// Default plaintext bytes per stream segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;

/// Largest accepted stream segment.
pub const MAX_SEGMENT_SIZE: usize = 1 << 24;

const FRAME_HEADER: usize = 4;
const FINAL_FLAG: u32 = 1 << 31;

const DATA_NONCE_CONTEXT: &str = "gordian-knot 2024-01-01 data cipher nonce";

/// Supported symmetric algorithms. The discriminant is the on-disk nibble id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SymKeyType {
    AesSiv = 1,
    AesGcm = 2,
    XChaCha20Poly1305 = 3,
}

impl SymKeyType {
    pub const ALL: [SymKeyType; 3] = [
        SymKeyType::AesSiv,
        SymKeyType::AesGcm,
        SymKeyType::XChaCha20Poly1305,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> GordianResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| GordianError::data(format!("unknown symmetric key type {id}")))
    }

    /// Key length in bytes for the restricted or full tier.
    pub fn key_len(self, restricted: bool) -> usize {
        match (self, restricted) {
            (SymKeyType::AesSiv, true) => 32,
            (SymKeyType::AesSiv, false) => 64,
            (SymKeyType::AesGcm, true) => 16,
            (SymKeyType::AesGcm, false) => 32,
            (SymKeyType::XChaCha20Poly1305, _) => 32,
        }
    }

    pub fn nonce_len(self) -> usize {
        match self {
            SymKeyType::AesSiv => 16,
            SymKeyType::AesGcm => 12,
            SymKeyType::XChaCha20Poly1305 => 24,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SymKeyType::AesSiv => "aes-siv",
            SymKeyType::AesGcm => "aes-gcm",
            SymKeyType::XChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

impl fmt::Display for SymKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymKeyType {
    type Err = GordianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| GordianError::config(format!("unknown symmetric key type {s:?}")))
    }
}

/// Raw secret key plus its algorithm and length tier. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    key_type: SymKeyType,
    restricted: bool,
    bytes: Zeroizing<Vec<u8>>,
}

impl SymmetricKey {
    /// Generate a random key.
    pub fn generate(key_type: SymKeyType, restricted: bool) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; key_type.key_len(restricted)]);
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            key_type,
            restricted,
            bytes,
        }
    }

    /// Rebuild a key from unwrapped secret bytes.
    pub fn from_secret(mode: SymKeyMode, bytes: Zeroizing<Vec<u8>>) -> GordianResult<Self> {
        let expected = mode.key_type.key_len(mode.restricted);
        if bytes.len() != expected {
            return Err(GordianError::data(format!(
                "{} key has {} bytes, expected {expected}",
                mode.key_type,
                bytes.len()
            )));
        }
        Ok(Self {
            key_type: mode.key_type,
            restricted: mode.restricted,
            bytes,
        })
    }

    pub fn key_type(&self) -> SymKeyType {
        self.key_type
    }

    pub fn mode(&self) -> SymKeyMode {
        SymKeyMode {
            key_type: self.key_type,
            restricted: self.restricted,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// One-shot deterministic cipher bound to this key.
    pub fn init_data_cipher(&self) -> GordianResult<DataCipher> {
        let nonce_key = Zeroizing::new(blake3::derive_key(DATA_NONCE_CONTEXT, &self.bytes));
        DataCipher::new(self.key_type, &self.bytes, nonce_key)
    }

    /// Stream encryptor with a fresh random IV. The IV must be stored with the ciphertext.
    pub fn init_encryption_stream(&self, segment_size: usize) -> GordianResult<(StreamEncryptor, Vec<u8>)> {
        if segment_size == 0 || segment_size > MAX_SEGMENT_SIZE {
            return Err(GordianError::config(format!(
                "segment size {segment_size} outside 1..={MAX_SEGMENT_SIZE}"
            )));
        }
        let mut iv = vec![0u8; self.key_type.nonce_len()];
        rand::thread_rng().fill_bytes(&mut iv);
        let engine = AeadEngine::new(self.key_type, &self.bytes)?;
        let encryptor = StreamEncryptor {
            engine,
            iv: iv.clone(),
            segment_size,
            index: 0,
            pending: Vec::with_capacity(segment_size),
        };
        Ok((encryptor, iv))
    }

    /// Stream decryptor for an IV produced by [`SymmetricKey::init_encryption_stream`].
    pub fn init_decryption_stream(&self, iv: &[u8]) -> GordianResult<StreamDecryptor> {
        if iv.len() != self.key_type.nonce_len() {
            return Err(GordianError::data(format!(
                "{} stream IV must be {} bytes, got {}",
                self.key_type,
                self.key_type.nonce_len(),
                iv.len()
            )));
        }
        Ok(StreamDecryptor {
            engine: AeadEngine::new(self.key_type, &self.bytes)?,
            iv: iv.to_vec(),
            index: 0,
            pending: Vec::new(),
            finished: false,
        })
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_type == other.key_type && bool::from(self.bytes.as_slice().ct_eq(other.bytes.as_slice()))
    }
}

impl Eq for SymmetricKey {}

impl Hash for SymmetricKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key_type.hash(state);
        self.bytes.as_slice().hash(state);
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key_type", &self.key_type)
            .field("restricted", &self.restricted)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// One initialized AEAD of any supported algorithm and key size.
pub(crate) enum AeadEngine {
    Aes128Siv(Box<Aes128SivAead>),
    Aes256Siv(Box<Aes256SivAead>),
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    XChaCha(Box<XChaCha20Poly1305>),
}

impl AeadEngine {
    pub(crate) fn new(key_type: SymKeyType, key: &[u8]) -> GordianResult<Self> {
        let invalid = |_| {
            GordianError::crypto(format!("{key_type} cannot be keyed with {} bytes", key.len()))
        };
        Ok(match (key_type, key.len()) {
            (SymKeyType::AesSiv, 32) => {
                AeadEngine::Aes128Siv(Box::new(Aes128SivAead::new_from_slice(key).map_err(invalid)?))
            }
            (SymKeyType::AesSiv, _) => {
                AeadEngine::Aes256Siv(Box::new(Aes256SivAead::new_from_slice(key).map_err(invalid)?))
            }
            (SymKeyType::AesGcm, 16) => {
                AeadEngine::Aes128Gcm(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))
            }
            (SymKeyType::AesGcm, _) => {
                AeadEngine::Aes256Gcm(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))
            }
            (SymKeyType::XChaCha20Poly1305, _) => AeadEngine::XChaCha(Box::new(
                XChaCha20Poly1305::new_from_slice(key).map_err(invalid)?,
            )),
        })
    }

    pub(crate) fn seal(&self, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, AeadError> {
        match self {
            AeadEngine::Aes128Siv(c) => seal_with(c.as_ref(), nonce, aad, msg),
            AeadEngine::Aes256Siv(c) => seal_with(c.as_ref(), nonce, aad, msg),
            AeadEngine::Aes128Gcm(c) => seal_with(c.as_ref(), nonce, aad, msg),
            AeadEngine::Aes256Gcm(c) => seal_with(c.as_ref(), nonce, aad, msg),
            AeadEngine::XChaCha(c) => seal_with(c.as_ref(), nonce, aad, msg),
        }
    }

    pub(crate) fn open(&self, nonce: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, AeadError> {
        match self {
            AeadEngine::Aes128Siv(c) => open_with(c.as_ref(), nonce, aad, sealed),
            AeadEngine::Aes256Siv(c) => open_with(c.as_ref(), nonce, aad, sealed),
            AeadEngine::Aes128Gcm(c) => open_with(c.as_ref(), nonce, aad, sealed),
            AeadEngine::Aes256Gcm(c) => open_with(c.as_ref(), nonce, aad, sealed),
            AeadEngine::XChaCha(c) => open_with(c.as_ref(), nonce, aad, sealed),
        }
    }
}

// Callers guarantee `nonce.len()` matches the algorithm's nonce size.
fn seal_with<A: Aead>(cipher: &A, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, AeadError> {
    cipher.encrypt(Nonce::<A>::from_slice(nonce), Payload { msg, aad })
}

fn open_with<A: Aead>(cipher: &A, nonce: &[u8], aad: &[u8], msg: &[u8]) -> Result<Vec<u8>, AeadError> {
    cipher.decrypt(Nonce::<A>::from_slice(nonce), Payload { msg, aad })
}

/// Deterministic single-shot AEAD: equal plaintexts give equal ciphertexts.
pub struct DataCipher {
    key_type: SymKeyType,
    engine: AeadEngine,
    nonce_key: Zeroizing<[u8; 32]>,
}

impl DataCipher {
    pub(crate) fn new(
        key_type: SymKeyType,
        key: &[u8],
        nonce_key: Zeroizing<[u8; 32]>,
    ) -> GordianResult<Self> {
        Ok(Self {
            key_type,
            engine: AeadEngine::new(key_type, key)?,
            nonce_key,
        })
    }

    pub fn key_type(&self) -> SymKeyType {
        self.key_type
    }

    /// Bytes added to every encrypted buffer.
    pub fn overhead(&self) -> usize {
        match self.key_type {
            SymKeyType::AesSiv => TAG_SIZE,
            other => other.nonce_len() + TAG_SIZE,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> GordianResult<Vec<u8>> {
        let failed = |_| GordianError::crypto(format!("{} encryption failed", self.key_type));
        match self.key_type {
            SymKeyType::AesSiv => {
                let nonce = [0u8; 16];
                self.engine.seal(&nonce, &[], plaintext).map_err(failed)
            }
            other => {
                let synthetic = blake3::keyed_hash(&self.nonce_key, plaintext);
                let nonce = &synthetic.as_bytes()[..other.nonce_len()];
                let sealed = self.engine.seal(nonce, &[], plaintext).map_err(failed)?;

                let mut out = Vec::with_capacity(nonce.len() + sealed.len());
                out.extend_from_slice(nonce);
                out.extend_from_slice(&sealed);
                Ok(out)
            }
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> GordianResult<Vec<u8>> {
        if ciphertext.len() < self.overhead() {
            return Err(GordianError::crypto(format!(
                "{} ciphertext too short: {} bytes (minimum {})",
                self.key_type,
                ciphertext.len(),
                self.overhead()
            )));
        }
        let failed = |_| {
            GordianError::crypto(format!("{} decryption failed: wrong key or corrupted data", self.key_type))
        };
        match self.key_type {
            SymKeyType::AesSiv => {
                let nonce = [0u8; 16];
                self.engine.open(&nonce, &[], ciphertext).map_err(failed)
            }
            other => {
                let (nonce, sealed) = ciphertext.split_at(other.nonce_len());
                self.engine.open(nonce, &[], sealed).map_err(failed)
            }
        }
    }
}

fn segment_nonce(iv: &[u8], index: u64) -> Vec<u8> {
    let mut nonce = iv.to_vec();
    for (byte, counter) in nonce.iter_mut().zip(index.to_le_bytes()) {
        *byte ^= counter;
    }
    nonce
}

fn segment_aad(index: u64, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = u8::from(last);
    aad
}

/// Push-style segment encryptor. Feed plaintext with `update`, end with `finish`.
pub struct StreamEncryptor {
    engine: AeadEngine,
    iv: Vec<u8>,
    segment_size: usize,
    index: u64,
    pending: Vec<u8>,
}

impl StreamEncryptor {
    /// Returns the frames completed by this input (possibly none).
    pub fn update(&mut self, data: &[u8]) -> GordianResult<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();
        // A full segment stays buffered until more input arrives, so only an empty stream has an empty final frame.
        while self.pending.len() > self.segment_size {
            let rest = self.pending.split_off(self.segment_size);
            let segment = std::mem::replace(&mut self.pending, rest);
            self.seal_frame(&segment, false, &mut out)?;
        }
        Ok(out)
    }

    /// Seal the buffered tail as the final frame.
    pub fn finish(mut self) -> GordianResult<Vec<u8>> {
        let segment = std::mem::take(&mut self.pending);
        let mut out = Vec::with_capacity(FRAME_HEADER + segment.len() + TAG_SIZE);
        self.seal_frame(&segment, true, &mut out)?;
        Ok(out)
    }

    fn seal_frame(&mut self, segment: &[u8], last: bool, out: &mut Vec<u8>) -> GordianResult<()> {
        let nonce = segment_nonce(&self.iv, self.index);
        let sealed = self
            .engine
            .seal(&nonce, &segment_aad(self.index, last), segment)
            .map_err(|e| GordianError::crypto(format!("segment {} encryption failed: {e}", self.index)))?;

        let mut header = sealed.len() as u32;
        if last {
            header |= FINAL_FLAG;
        }
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&sealed);
        self.index += 1;
        Ok(())
    }
}

/// Push-style segment decryptor. Plaintext is released one authenticated segment at a time.
pub struct StreamDecryptor {
    engine: AeadEngine,
    iv: Vec<u8>,
    index: u64,
    pending: Vec<u8>,
    finished: bool,
}

impl StreamDecryptor {
    pub fn update(&mut self, data: &[u8]) -> GordianResult<Vec<u8>> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            if self.finished {
                if !self.pending.is_empty() {
                    return Err(GordianError::integrity("data after final stream segment"));
                }
                break;
            }
            if self.pending.len() < FRAME_HEADER {
                break;
            }
            let header = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]);
            let last = header & FINAL_FLAG != 0;
            let len = (header & !FINAL_FLAG) as usize;
            if len < TAG_SIZE || len > MAX_SEGMENT_SIZE + TAG_SIZE {
                return Err(GordianError::integrity(format!(
                    "segment {} declares invalid length {len}",
                    self.index
                )));
            }
            if self.pending.len() < FRAME_HEADER + len {
                break;
            }

            let nonce = segment_nonce(&self.iv, self.index);
            let plain = self
                .engine
                .open(
                    &nonce,
                    &segment_aad(self.index, last),
                    &self.pending[FRAME_HEADER..FRAME_HEADER + len],
                )
                .map_err(|_| {
                    GordianError::integrity(format!("segment {} failed authentication", self.index))
                })?;
            self.pending.drain(..FRAME_HEADER + len);
            out.extend_from_slice(&plain);
            self.index += 1;
            self.finished = last;
        }
        Ok(out)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Verify the stream ended on its final segment.
    pub fn finish(self) -> GordianResult<()> {
        if !self.finished {
            return Err(GordianError::integrity(format!(
                "stream truncated after {} segments",
                self.index
            )));
        }
        if !self.pending.is_empty() {
            return Err(GordianError::integrity("data after final stream segment"));
        }
        Ok(())
    }
}
