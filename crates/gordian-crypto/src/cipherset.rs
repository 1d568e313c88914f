//! Cipher set: a deterministic cascade of AEAD layers keyed from one seed
//!
//! Each selected algorithm gets its own sub-key and nonce key:
//! ```text
//! sub_key   = expand(seed, "gordian-cipher" || id || "key")    (full-tier key length)
//! nonce_key = expand(seed, "gordian-cipher" || id || "nonce")  (32 bytes)
//! ```
//! `expand` is the mode digest's HKDF (or BLAKE3 XOF). Layers run in ascending
//! algorithm id order on encrypt and in reverse on decrypt.

use std::fmt;

use gordian_core::{GordianError, GordianResult};
use zeroize::Zeroizing;

use crate::asymmetric::AsymmetricKey;
use crate::keymode::{AsymKeyMode, CipherMode};
use crate::needle::{self, AsymModeNeedle, SymKeyNeedle};
use crate::symmetric::{DataCipher, SymmetricKey};

const CIPHER_INFO: &[u8] = b"gordian-cipher";

pub struct CipherSet {
    mode: CipherMode,
    layers: Vec<DataCipher>,
}

impl CipherSet {
    /// Derive every layer from `seed`. Fails as a whole if any layer cannot be keyed.
    pub fn build(mode: CipherMode, seed: &[u8]) -> GordianResult<Self> {
        if seed.is_empty() {
            return Err(GordianError::crypto("cipher set seed is empty"));
        }
        let layers = mode
            .ciphers
            .types()
            .into_iter()
            .map(|key_type| {
                let mut key = Zeroizing::new(vec![0u8; key_type.key_len(false)]);
                mode.digest
                    .expand(seed, &layer_info(key_type.id(), b"key"), &mut key)?;
                let mut nonce_key = Zeroizing::new([0u8; 32]);
                mode.digest
                    .expand(seed, &layer_info(key_type.id(), b"nonce"), &mut nonce_key[..])?;
                DataCipher::new(key_type, &key, nonce_key)
            })
            .collect::<GordianResult<Vec<_>>>()?;

        tracing::debug!(digest = ?mode.digest, layers = layers.len(), "built cipher set");
        Ok(Self { mode, layers })
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> GordianResult<Vec<u8>> {
        let mut buf = plaintext.to_vec();
        for layer in &self.layers {
            buf = layer.encrypt(&buf)?;
        }
        Ok(buf)
    }

    pub fn decrypt_bytes(&self, ciphertext: &[u8]) -> GordianResult<Vec<u8>> {
        let mut buf = ciphertext.to_vec();
        for layer in self.layers.iter().rev() {
            buf = layer.decrypt(&buf)?;
        }
        Ok(buf)
    }

    pub fn encrypt_string(&self, text: &str) -> GordianResult<Vec<u8>> {
        self.encrypt_bytes(text.as_bytes())
    }

    pub fn decrypt_string(&self, ciphertext: &[u8]) -> GordianResult<String> {
        let bytes = self.decrypt_bytes(ciphertext)?;
        String::from_utf8(bytes).map_err(|e| GordianError::data(format!("decrypted text is not UTF-8: {e}")))
    }

    /// Encrypt a key pair's private half as `needle(mode, [private key])`.
    pub fn secure_private_key(&self, key: &AsymmetricKey) -> GordianResult<Vec<u8>> {
        let private = key
            .private_key()
            .ok_or_else(|| GordianError::logic("cannot secure a public-only key"))?;
        let encoded = Zeroizing::new(needle::encode(key.mode().key_mode(), &[private])?);
        self.encrypt_bytes(&encoded)
    }

    /// Rebuild a full key pair from [`CipherSet::secure_private_key`] output and its public definition.
    pub fn derive_asymmetric_key(&self, secured: &[u8], external_def: &[u8]) -> GordianResult<AsymmetricKey> {
        let public = AsymModeNeedle::decode(external_def)?;
        let decrypted = Zeroizing::new(self.decrypt_bytes(secured)?);
        let mut decoded = needle::decode_exact(&decrypted, 1)?;
        let mode = AsymKeyMode::from_key_mode(decoded.mode)?;
        if mode != public.mode {
            return Err(GordianError::data("secured private key does not match its public definition"));
        }
        let private = Zeroizing::new(std::mem::take(&mut decoded.blobs[0]));
        AsymmetricKey::from_parts(mode, &public.public_key, Some(private))
    }

    pub fn secure_symmetric_key(&self, key: &SymmetricKey) -> GordianResult<Vec<u8>> {
        SymKeyNeedle {
            mode: key.mode(),
            wrapped: self.encrypt_bytes(key.as_bytes())?,
        }
        .encode()
    }

    pub fn derive_symmetric_key(&self, secured: &[u8]) -> GordianResult<SymmetricKey> {
        let needle = SymKeyNeedle::decode(secured)?;
        let secret = Zeroizing::new(self.decrypt_bytes(&needle.wrapped)?);
        SymmetricKey::from_secret(needle.mode, secret)
    }
}

impl fmt::Debug for CipherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSet")
            .field("digest", &self.mode.digest)
            .field("ciphers", &self.mode.ciphers.types())
            .finish()
    }
}

fn layer_info(id: u8, purpose: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(CIPHER_INFO.len() + 1 + purpose.len());
    info.extend_from_slice(CIPHER_INFO);
    info.push(id);
    info.extend_from_slice(purpose);
    info
}
