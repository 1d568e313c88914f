//! Asymmetric key pairs: RSA key transport and signatures, Curve25519 agreement
//!
//! Encodings:
//! ```text
//! RSA-2048    public = SPKI DER                 private = PKCS#8 DER
//! Curve25519  public = X25519 pub || Ed25519 pub   private = X25519 secret || Ed25519 seed
//! ```
//!
//! Elliptic keys never touch the symmetric keys directly: both partners derive
//! the same seed from the X25519 shared secret and build a `CipherSet` from it.
//! RSA keys wrap symmetric keys with OAEP-SHA256 and encrypt text block by block.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use ed25519_dalek::{Signer as _, Verifier as _};
use gordian_core::{GordianError, GordianResult};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipherset::CipherSet;
use crate::keymode::AsymKeyMode;
use crate::needle::{AsymModeNeedle, SymKeyNeedle};
use crate::symmetric::SymmetricKey;

const RSA_BITS: usize = 2048;
const RSA_BLOCK: usize = RSA_BITS / 8;
/// Largest OAEP-SHA256 plaintext for a 2048-bit modulus.
const RSA_CHUNK: usize = RSA_BLOCK - 2 * 32 - 2;

const CURVE_KEY: usize = 32;
const AGREEMENT_INFO: &[u8] = b"gordian-agreement";

/// Supported asymmetric algorithms. The discriminant is the on-disk nibble id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AsymKeyType {
    Rsa2048 = 1,
    Curve25519 = 2,
}

impl AsymKeyType {
    pub const ALL: [AsymKeyType; 2] = [AsymKeyType::Rsa2048, AsymKeyType::Curve25519];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> GordianResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| GordianError::data(format!("unknown asymmetric key type {id}")))
    }

    /// Elliptic keys negotiate cipher sets; the others wrap and encrypt directly.
    pub fn is_elliptic(self) -> bool {
        matches!(self, AsymKeyType::Curve25519)
    }

    pub fn name(self) -> &'static str {
        match self {
            AsymKeyType::Rsa2048 => "rsa2048",
            AsymKeyType::Curve25519 => "curve25519",
        }
    }
}

impl fmt::Display for AsymKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AsymKeyType {
    type Err = GordianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| GordianError::config(format!("unknown asymmetric key type {s:?}")))
    }
}

enum KeyMaterial {
    Rsa {
        public: RsaPublicKey,
        private: Option<RsaPrivateKey>,
    },
    Curve {
        agreement_public: x25519_dalek::PublicKey,
        verifying: ed25519_dalek::VerifyingKey,
        private: Option<CurvePrivate>,
    },
}

struct CurvePrivate {
    agreement: x25519_dalek::StaticSecret,
    signing: ed25519_dalek::SigningKey,
}

/// A key pair, or just its public half, plus the caches negotiated through it.
pub struct AsymmetricKey {
    mode: AsymKeyMode,
    public_key: Vec<u8>,
    private_key: Option<Zeroizing<Vec<u8>>>,
    external_def: Vec<u8>,
    material: KeyMaterial,
    partner_ciphers: Mutex<HashMap<Vec<u8>, Arc<CipherSet>>>,
    wrapped_keys: Mutex<HashMap<SymmetricKey, Vec<u8>>>,
}

impl AsymmetricKey {
    /// Generate a fresh key pair.
    pub fn generate(mode: AsymKeyMode) -> GordianResult<Self> {
        let mut rng = rand::thread_rng();
        match mode.key_type() {
            AsymKeyType::Rsa2048 => {
                let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
                    .map_err(|e| GordianError::crypto(format!("RSA key generation failed: {e}")))?;
                let encoded = Zeroizing::new(rsa_private_der(&private)?);
                Self::from_parts(mode, &rsa_public_der(&RsaPublicKey::from(&private))?, Some(encoded))
            }
            AsymKeyType::Curve25519 => {
                let mut private = Zeroizing::new(vec![0u8; 2 * CURVE_KEY]);
                rng.fill_bytes(&mut private);
                let keys = curve_private(&private)?;
                let public = curve_public_bytes(
                    &x25519_dalek::PublicKey::from(&keys.agreement),
                    &keys.signing.verifying_key(),
                );
                Self::from_parts(mode, &public, Some(private))
            }
        }
    }

    /// Public-only key from a shareable definition.
    pub fn from_external(external_def: &[u8]) -> GordianResult<Self> {
        let needle = AsymModeNeedle::decode(external_def)?;
        Self::from_parts(needle.mode, &needle.public_key, None)
    }

    /// Build from encoded key halves. A private half must match the public one.
    pub fn from_parts(
        mode: AsymKeyMode,
        public_key: &[u8],
        private_key: Option<Zeroizing<Vec<u8>>>,
    ) -> GordianResult<Self> {
        let material = match mode.key_type() {
            AsymKeyType::Rsa2048 => {
                let public = RsaPublicKey::from_public_key_der(public_key)
                    .map_err(|e| GordianError::data(format!("invalid RSA public key: {e}")))?;
                let private = private_key
                    .as_ref()
                    .map(|der| {
                        RsaPrivateKey::from_pkcs8_der(der)
                            .map_err(|e| GordianError::data(format!("invalid RSA private key: {e}")))
                    })
                    .transpose()?;
                if let Some(private) = &private {
                    if RsaPublicKey::from(private) != public {
                        return Err(GordianError::data("RSA private key does not match public key"));
                    }
                }
                KeyMaterial::Rsa { public, private }
            }
            AsymKeyType::Curve25519 => {
                let (agreement_public, verifying) = curve_public(public_key)?;
                let private = private_key.as_deref().map(|b| curve_private(b)).transpose()?;
                if let Some(keys) = &private {
                    let derived = curve_public_bytes(
                        &x25519_dalek::PublicKey::from(&keys.agreement),
                        &keys.signing.verifying_key(),
                    );
                    if derived != public_key {
                        return Err(GordianError::data("Curve25519 private key does not match public key"));
                    }
                }
                KeyMaterial::Curve {
                    agreement_public,
                    verifying,
                    private,
                }
            }
        };

        let external_def = AsymModeNeedle {
            mode,
            public_key: public_key.to_vec(),
        }
        .encode()?;

        Ok(Self {
            mode,
            public_key: public_key.to_vec(),
            private_key,
            external_def,
            material,
            partner_ciphers: Mutex::new(HashMap::new()),
            wrapped_keys: Mutex::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> AsymKeyMode {
        self.mode
    }

    pub fn is_public_only(&self) -> bool {
        self.private_key.is_none()
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> Option<&[u8]> {
        self.private_key.as_deref().map(Vec::as_slice)
    }

    /// Shareable `[AsymKeyMode][public key]` needle.
    pub fn external_def(&self) -> &[u8] {
        &self.external_def
    }

    /// Public-only copy of this key.
    pub fn public_half(&self) -> GordianResult<Self> {
        Self::from_parts(self.mode, &self.public_key, None)
    }

    /// Cipher set agreed with `partner`, computed once per partner.
    pub fn cipher_set(&self, partner: &AsymmetricKey) -> GordianResult<Arc<CipherSet>> {
        if !self.mode.is_elliptic() || !partner.mode.is_elliptic() {
            return Err(GordianError::logic("cipher sets are only negotiated between elliptic keys"));
        }
        if self.mode != partner.mode {
            return Err(GordianError::logic("partner key uses a different key mode"));
        }
        let KeyMaterial::Curve { private, .. } = &self.material else {
            return Err(GordianError::logic("key material does not match elliptic mode"));
        };
        let Some(own) = private else {
            return Err(GordianError::logic("public-only key cannot negotiate a cipher set"));
        };
        let KeyMaterial::Curve {
            agreement_public: partner_public,
            ..
        } = &partner.material
        else {
            return Err(GordianError::logic("partner key material does not match elliptic mode"));
        };

        let mut cache = self
            .partner_ciphers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(&partner.external_def) {
            return Ok(Arc::clone(cached));
        }

        let shared = own.agreement.diffie_hellman(partner_public);
        if !shared.was_contributory() {
            return Err(GordianError::crypto("key agreement produced a non-contributory secret"));
        }

        // Order the public keys so both partners derive the same seed.
        let (first, second) = if self.public_key <= partner.public_key {
            (&self.public_key, &partner.public_key)
        } else {
            (&partner.public_key, &self.public_key)
        };
        let mut info = Vec::with_capacity(AGREEMENT_INFO.len() + first.len() + second.len());
        info.extend_from_slice(AGREEMENT_INFO);
        info.extend_from_slice(first);
        info.extend_from_slice(second);

        let digest = self.mode.cipher_mode().digest;
        let mut seed = Zeroizing::new(vec![0u8; digest.output_len()]);
        digest.expand(shared.as_bytes(), &info, &mut seed)?;

        let set = Arc::new(CipherSet::build(self.mode.cipher_mode(), &seed)?);
        cache.insert(partner.external_def.clone(), Arc::clone(&set));
        tracing::debug!(partners = cache.len(), "negotiated cipher set");
        Ok(set)
    }

    /// Cipher set agreed with this key itself, used for its own key wrapping.
    pub fn own_cipher_set(&self) -> GordianResult<Arc<CipherSet>> {
        self.cipher_set(self)
    }

    /// Wrap a symmetric key. Repeated calls for the same key return the same bytes.
    pub fn secure_symmetric_key(&self, key: &SymmetricKey) -> GordianResult<Vec<u8>> {
        if let Some(cached) = self.wrapped_cache().get(key) {
            return Ok(cached.clone());
        }

        let secured = match &self.material {
            KeyMaterial::Curve { .. } => self.own_cipher_set()?.secure_symmetric_key(key)?,
            KeyMaterial::Rsa { public, .. } => {
                let wrapped = public
                    .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())
                    .map_err(|e| GordianError::crypto(format!("RSA key wrap failed: {e}")))?;
                SymKeyNeedle {
                    mode: key.mode(),
                    wrapped,
                }
                .encode()?
            }
        };

        Ok(self
            .wrapped_cache()
            .entry(key.clone())
            .or_insert(secured)
            .clone())
    }

    /// Unwrap a symmetric key secured by this key pair. Requires the private key.
    pub fn derive_symmetric_key(&self, secured: &[u8]) -> GordianResult<SymmetricKey> {
        let key = match &self.material {
            KeyMaterial::Curve { private: None, .. } | KeyMaterial::Rsa { private: None, .. } => {
                return Err(GordianError::logic("public-only key cannot unwrap keys"));
            }
            KeyMaterial::Curve { .. } => self.own_cipher_set()?.derive_symmetric_key(secured)?,
            KeyMaterial::Rsa {
                private: Some(private),
                ..
            } => {
                let needle = SymKeyNeedle::decode(secured)?;
                let secret = private
                    .decrypt(Oaep::new::<Sha256>(), &needle.wrapped)
                    .map_err(|_| GordianError::crypto("RSA key unwrap failed: wrong key or corrupted data"))?;
                SymmetricKey::from_secret(needle.mode, Zeroizing::new(secret))?
            }
        };
        self.wrapped_cache()
            .entry(key.clone())
            .or_insert_with(|| secured.to_vec());
        Ok(key)
    }

    fn wrapped_cache(&self) -> std::sync::MutexGuard<'_, HashMap<SymmetricKey, Vec<u8>>> {
        self.wrapped_keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signature builder. Requires the private key.
    pub fn signer(&self) -> GordianResult<Signer> {
        let key = match &self.material {
            KeyMaterial::Rsa {
                private: Some(private),
                ..
            } => SigningMaterial::Rsa(Box::new(rsa::pkcs1v15::SigningKey::<Sha256>::new(private.clone()))),
            KeyMaterial::Curve {
                private: Some(keys),
                ..
            } => SigningMaterial::Ed25519(Box::new(keys.signing.clone())),
            _ => return Err(GordianError::logic("public-only key cannot sign")),
        };
        Ok(Signer {
            key,
            message: Vec::new(),
        })
    }

    /// Signature checker. Works with public-only keys.
    pub fn verifier(&self) -> Verifier {
        let key = match &self.material {
            KeyMaterial::Rsa { public, .. } => {
                VerifyingMaterial::Rsa(Box::new(rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone())))
            }
            KeyMaterial::Curve { verifying, .. } => VerifyingMaterial::Ed25519(Box::new(*verifying)),
        };
        Verifier {
            key,
            message: Vec::new(),
        }
    }

    /// Encrypt text for `target`, which must share this key's mode.
    pub fn encrypt_string(&self, text: &str, target: &AsymmetricKey) -> GordianResult<Vec<u8>> {
        if self.mode != target.mode {
            return Err(GordianError::logic("target key uses a different key mode"));
        }
        match &target.material {
            KeyMaterial::Curve { .. } => self.cipher_set(target)?.encrypt_string(text),
            KeyMaterial::Rsa { public, .. } => {
                let mut rng = rand::thread_rng();
                let mut out = Vec::with_capacity(text.len().div_ceil(RSA_CHUNK) * RSA_BLOCK);
                for chunk in text.as_bytes().chunks(RSA_CHUNK) {
                    let block = public
                        .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                        .map_err(|e| GordianError::crypto(format!("RSA encryption failed: {e}")))?;
                    out.extend_from_slice(&block);
                }
                Ok(out)
            }
        }
    }

    /// Decrypt text that `source` encrypted for this key.
    pub fn decrypt_string(&self, ciphertext: &[u8], source: &AsymmetricKey) -> GordianResult<String> {
        if self.mode != source.mode {
            return Err(GordianError::logic("source key uses a different key mode"));
        }
        match &self.material {
            KeyMaterial::Curve { .. } => self.cipher_set(source)?.decrypt_string(ciphertext),
            KeyMaterial::Rsa { private: None, .. } => {
                Err(GordianError::logic("public-only key cannot decrypt"))
            }
            KeyMaterial::Rsa {
                private: Some(private),
                ..
            } => {
                if ciphertext.len() % RSA_BLOCK != 0 {
                    return Err(GordianError::data(format!(
                        "RSA ciphertext of {} bytes is not a whole number of {RSA_BLOCK}-byte blocks",
                        ciphertext.len()
                    )));
                }
                let mut plain = Zeroizing::new(Vec::with_capacity(ciphertext.len()));
                for block in ciphertext.chunks(RSA_BLOCK) {
                    let chunk = Zeroizing::new(
                        private
                            .decrypt(Oaep::new::<Sha256>(), block)
                            .map_err(|_| GordianError::crypto("RSA decryption failed: wrong key or corrupted data"))?,
                    );
                    plain.extend_from_slice(&chunk);
                }
                String::from_utf8(plain.to_vec())
                    .map_err(|e| GordianError::data(format!("decrypted text is not UTF-8: {e}")))
            }
        }
    }
}

impl PartialEq for AsymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.private_key() == other.private_key()
            && self.public_key == other.public_key
    }
}

impl Eq for AsymmetricKey {}

impl fmt::Debug for AsymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKey")
            .field("mode", &self.mode)
            .field("public_key_len", &self.public_key.len())
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

enum SigningMaterial {
    Rsa(Box<rsa::pkcs1v15::SigningKey<Sha256>>),
    Ed25519(Box<ed25519_dalek::SigningKey>),
}

/// Accumulates a message and signs it in one go.
pub struct Signer {
    key: SigningMaterial,
    message: Vec<u8>,
}

impl Signer {
    pub fn update(&mut self, data: &[u8]) {
        self.message.extend_from_slice(data);
    }

    pub fn sign(self) -> GordianResult<Vec<u8>> {
        match &self.key {
            SigningMaterial::Rsa(key) => {
                let signature: rsa::pkcs1v15::Signature = key
                    .try_sign(&self.message)
                    .map_err(|e| GordianError::crypto(format!("RSA signing failed: {e}")))?;
                Ok(signature.to_vec())
            }
            SigningMaterial::Ed25519(key) => Ok(key.sign(&self.message).to_bytes().to_vec()),
        }
    }
}

enum VerifyingMaterial {
    Rsa(Box<rsa::pkcs1v15::VerifyingKey<Sha256>>),
    Ed25519(Box<ed25519_dalek::VerifyingKey>),
}

/// Accumulates a message and checks a signature over it.
pub struct Verifier {
    key: VerifyingMaterial,
    message: Vec<u8>,
}

impl Verifier {
    pub fn update(&mut self, data: &[u8]) {
        self.message.extend_from_slice(data);
    }

    /// Any mismatch, including a malformed signature, is an `Integrity` error.
    pub fn verify(self, signature: &[u8]) -> GordianResult<()> {
        let valid = match &self.key {
            VerifyingMaterial::Rsa(key) => rsa::pkcs1v15::Signature::try_from(signature)
                .map(|sig| key.verify(&self.message, &sig).is_ok())
                .unwrap_or(false),
            VerifyingMaterial::Ed25519(key) => ed25519_dalek::Signature::from_slice(signature)
                .map(|sig| key.verify(&self.message, &sig).is_ok())
                .unwrap_or(false),
        };
        if valid {
            Ok(())
        } else {
            Err(GordianError::integrity("signature mismatch"))
        }
    }
}

fn rsa_public_der(key: &RsaPublicKey) -> GordianResult<Vec<u8>> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| GordianError::crypto(format!("encoding RSA public key: {e}")))
}

fn rsa_private_der(key: &RsaPrivateKey) -> GordianResult<Vec<u8>> {
    key.to_pkcs8_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| GordianError::crypto(format!("encoding RSA private key: {e}")))
}

fn curve_half(bytes: &[u8]) -> GordianResult<([u8; CURVE_KEY], [u8; CURVE_KEY])> {
    if bytes.len() != 2 * CURVE_KEY {
        return Err(GordianError::data(format!(
            "Curve25519 key must be {} bytes, got {}",
            2 * CURVE_KEY,
            bytes.len()
        )));
    }
    let mut first = [0u8; CURVE_KEY];
    let mut second = [0u8; CURVE_KEY];
    first.copy_from_slice(&bytes[..CURVE_KEY]);
    second.copy_from_slice(&bytes[CURVE_KEY..]);
    Ok((first, second))
}

fn curve_public(bytes: &[u8]) -> GordianResult<(x25519_dalek::PublicKey, ed25519_dalek::VerifyingKey)> {
    let (agreement, verifying) = curve_half(bytes)?;
    let verifying = ed25519_dalek::VerifyingKey::from_bytes(&verifying)
        .map_err(|e| GordianError::data(format!("invalid Ed25519 public key: {e}")))?;
    Ok((x25519_dalek::PublicKey::from(agreement), verifying))
}

fn curve_private(bytes: &[u8]) -> GordianResult<CurvePrivate> {
    let (agreement, signing) = curve_half(bytes)?;
    let agreement = Zeroizing::new(agreement);
    let signing = Zeroizing::new(signing);
    Ok(CurvePrivate {
        agreement: x25519_dalek::StaticSecret::from(*agreement),
        signing: ed25519_dalek::SigningKey::from_bytes(&signing),
    })
}

fn curve_public_bytes(agreement: &x25519_dalek::PublicKey, verifying: &ed25519_dalek::VerifyingKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * CURVE_KEY);
    out.extend_from_slice(agreement.as_bytes());
    out.extend_from_slice(verifying.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestType;
    use crate::keymode::CipherSelection;
    use crate::symmetric::SymKeyType;
    use std::sync::OnceLock;

    fn curve_mode() -> AsymKeyMode {
        AsymKeyMode::new(AsymKeyType::Curve25519, DigestType::Sha512, CipherSelection::all())
    }

    fn rsa_mode() -> AsymKeyMode {
        AsymKeyMode::new(AsymKeyType::Rsa2048, DigestType::Sha256, CipherSelection::all())
    }

    // RSA generation is slow; share one pair across tests.
    fn rsa_key() -> &'static AsymmetricKey {
        static KEY: OnceLock<AsymmetricKey> = OnceLock::new();
        KEY.get_or_init(|| AsymmetricKey::generate(rsa_mode()).unwrap())
    }

    #[test]
    fn key_type_names_parse() {
        assert_eq!("curve25519".parse::<AsymKeyType>().unwrap(), AsymKeyType::Curve25519);
        assert_eq!("rsa2048".parse::<AsymKeyType>().unwrap(), AsymKeyType::Rsa2048);
        assert!(matches!("dsa".parse::<AsymKeyType>(), Err(GordianError::Config(_))));
    }

    #[test]
    fn external_def_roundtrip_is_public_only() {
        let full = AsymmetricKey::generate(curve_mode()).unwrap();
        let public = AsymmetricKey::from_external(full.external_def()).unwrap();
        assert!(public.is_public_only());
        assert_eq!(public.public_key(), full.public_key());
        assert_eq!(public.external_def(), full.external_def());
        assert_ne!(public, full);
        assert_eq!(public, full.public_half().unwrap());
    }

    #[test]
    fn elliptic_partners_agree() {
        let a = AsymmetricKey::generate(curve_mode()).unwrap();
        let b = AsymmetricKey::generate(curve_mode()).unwrap();
        let c = AsymmetricKey::generate(curve_mode()).unwrap();
        let b_public = AsymmetricKey::from_external(b.external_def()).unwrap();
        let a_public = a.public_half().unwrap();

        // Public-only B cannot negotiate at all.
        assert!(matches!(b_public.cipher_set(&a), Err(GordianError::Logic(_))));

        let ct = a.encrypt_string("meet at noon", &b_public).unwrap();
        assert_eq!(b.decrypt_string(&ct, &a_public).unwrap(), "meet at noon");
        assert!(c.decrypt_string(&ct, &a_public).is_err());
    }

    #[test]
    fn negotiated_sets_are_cached() {
        let a = AsymmetricKey::generate(curve_mode()).unwrap();
        let b = AsymmetricKey::generate(curve_mode()).unwrap();
        let first = a.cipher_set(&b).unwrap();
        let second = a.cipher_set(&b).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn mismatched_modes_are_logic_errors() {
        let a = AsymmetricKey::generate(curve_mode()).unwrap();
        let other_mode = AsymKeyMode::new(AsymKeyType::Curve25519, DigestType::Blake3, CipherSelection::all());
        let b = AsymmetricKey::generate(other_mode).unwrap();
        assert!(matches!(a.cipher_set(&b), Err(GordianError::Logic(_))));
        assert!(matches!(a.encrypt_string("x", &b), Err(GordianError::Logic(_))));
        assert!(matches!(a.cipher_set(rsa_key()), Err(GordianError::Logic(_))));
    }

    #[test]
    fn elliptic_wrap_is_idempotent() {
        let a = AsymmetricKey::generate(curve_mode()).unwrap();
        let key = SymmetricKey::generate(SymKeyType::XChaCha20Poly1305, false);
        let first = a.secure_symmetric_key(&key).unwrap();
        assert_eq!(first, a.secure_symmetric_key(&key).unwrap());
        assert_eq!(a.derive_symmetric_key(&first).unwrap(), key);

        let public = a.public_half().unwrap();
        assert!(matches!(public.derive_symmetric_key(&first), Err(GordianError::Logic(_))));
    }

    #[test]
    fn rsa_wrap_is_idempotent_through_cache() {
        let rsa = rsa_key();
        let key = SymmetricKey::generate(SymKeyType::AesGcm, true);
        let first = rsa.secure_symmetric_key(&key).unwrap();
        assert_eq!(first, rsa.secure_symmetric_key(&key).unwrap());
        assert_eq!(rsa.derive_symmetric_key(&first).unwrap(), key);

        // A public-only RSA key can wrap but not unwrap.
        let public = rsa.public_half().unwrap();
        let wrapped = public.secure_symmetric_key(&key).unwrap();
        assert!(matches!(public.derive_symmetric_key(&wrapped), Err(GordianError::Logic(_))));
        assert_eq!(rsa.derive_symmetric_key(&wrapped).unwrap(), key);
    }

    #[test]
    fn rsa_block_encryption_roundtrip() {
        let rsa = rsa_key();
        let text = "x".repeat(RSA_CHUNK * 2 + 17);
        let ct = rsa.encrypt_string(&text, &rsa.public_half().unwrap()).unwrap();
        assert_eq!(ct.len(), 3 * RSA_BLOCK);
        assert_eq!(rsa.decrypt_string(&ct, rsa).unwrap(), text);
        assert!(matches!(rsa.decrypt_string(&ct[..100], rsa), Err(GordianError::Data(_))));
        assert!(rsa.encrypt_string("", rsa).unwrap().is_empty());
    }

    #[test]
    fn signatures_verify_and_detect_changes() {
        for key in [AsymmetricKey::generate(curve_mode()).unwrap(), rsa_key().public_half().unwrap()] {
            let signer_key = if key.is_public_only() { rsa_key() } else { &key };
            let mut signer = signer_key.signer().unwrap();
            signer.update(b"wrapped key");
            signer.update(b"digest");
            let signature = signer.sign().unwrap();

            let mut verifier = key.verifier();
            verifier.update(b"wrapped keydigest");
            verifier.verify(&signature).unwrap();

            let mut verifier = key.verifier();
            verifier.update(b"wrapped keydigesT");
            assert!(matches!(verifier.verify(&signature), Err(GordianError::Integrity(_))));

            let verifier = key.verifier();
            assert!(matches!(verifier.verify(b"short"), Err(GordianError::Integrity(_))));
        }
    }

    #[test]
    fn public_only_cannot_sign() {
        let key = AsymmetricKey::generate(curve_mode()).unwrap().public_half().unwrap();
        assert!(matches!(key.signer(), Err(GordianError::Logic(_))));
    }

    #[test]
    fn rsa_external_def_fits_bound() {
        assert!(rsa_key().external_def().len() <= crate::needle::MAX_ASYM_NEEDLE);
    }

    #[test]
    fn concurrent_negotiation_shares_one_set() {
        let a = Arc::new(AsymmetricKey::generate(curve_mode()).unwrap());
        let b = Arc::new(AsymmetricKey::generate(curve_mode()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (a, b) = (Arc::clone(&a), Arc::clone(&b));
                std::thread::spawn(move || a.cipher_set(&b).unwrap())
            })
            .collect();
        let sets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
