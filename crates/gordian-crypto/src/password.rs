//! Password hashing and secret derivation
//!
//! Three MAC chains keyed with the (optionally Argon2id pre-stretched) password
//! run over the salt:
//! ```text
//! round i:  prime_i     = MAC_d1(key, "prime"     || prime_{i-1}  || i || seed [|| alt_{i-1}          every 7th])
//!           alternate_i = MAC_d2(key, "alternate" || alt_{i-1}    || i || seed [|| prime_{i-1}        every 5th])
//!           secret_i    = MAC_d2(key, "secret"    || secret_{i-1} || i || seed [|| prime_{i-1} || alt_{i-1} every 3rd])
//! ```
//! Each chain's outputs are XOR-folded into an accumulator. The stored hash is
//! `needle(mode, salt, prime_acc ^ alt_acc)`; the secret accumulator seeds the
//! cipher set and never leaves this module.

use std::fmt;
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use gordian_core::{GordianError, GordianResult};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::asymmetric::AsymmetricKey;
use crate::cipherset::CipherSet;
use crate::digest::DigestType;
use crate::generator::SecurityGenerator;
use crate::keymode::{Hardening, HashMode};
use crate::needle::HashModeNeedle;
use crate::symmetric::SymmetricKey;

const PRIME_FOLD: u32 = 7;
const ALTERNATE_FOLD: u32 = 5;
const SECRET_FOLD: u32 = 3;

/// Argon2id output length used as the MAC key.
const HARDENED_KEY: usize = 64;

/// Argon2id parameters for the optional pre-stretch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 19456,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Output of one derivation run.
struct Derived {
    hash_bytes: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
}

/// A verified password hash and the cipher set it unlocks.
pub struct PasswordHash {
    generator: SecurityGenerator,
    mode: HashMode,
    salt: Vec<u8>,
    hash_bytes: Vec<u8>,
    cipher_set: Arc<CipherSet>,
    encrypted_password: Vec<u8>,
}

impl PasswordHash {
    /// Hash a new password under a fresh salt and a fresh random mode.
    pub fn derive_new(generator: &SecurityGenerator, password: SecretString) -> GordianResult<Self> {
        let mode = generator.new_hash_mode()?;
        let salt = generator.new_salt();
        let derived = derive(generator, &mode, &salt, password.expose_secret().as_bytes())?;
        tracing::debug!(
            prime = ?mode.prime_digest(),
            alternate = ?mode.alternate_digest(),
            hardening = ?mode.hardening(),
            "derived new password hash"
        );
        Self::assemble(generator, mode, salt, derived, &password)
    }

    /// Re-derive a stored hash. A different password fails with `Authentication`.
    pub fn derive_from_stored(
        generator: &SecurityGenerator,
        stored: &[u8],
        password: SecretString,
    ) -> GordianResult<Self> {
        let needle = HashModeNeedle::decode(stored)?;
        let derived = derive(generator, &needle.mode, &needle.salt, password.expose_secret().as_bytes())?;
        if !bool::from(derived.hash_bytes.as_slice().ct_eq(stored)) {
            tracing::debug!("password hash mismatch");
            return Err(GordianError::Authentication);
        }
        Self::assemble(generator, needle.mode, needle.salt, derived, &password)
    }

    fn assemble(
        generator: &SecurityGenerator,
        mode: HashMode,
        salt: Vec<u8>,
        derived: Derived,
        password: &SecretString,
    ) -> GordianResult<Self> {
        let cipher_set = Arc::new(CipherSet::build(mode.cipher_mode(), &derived.secret)?);
        let encrypted_password = cipher_set.encrypt_string(password.expose_secret())?;
        Ok(Self {
            generator: generator.clone(),
            mode,
            salt,
            hash_bytes: derived.hash_bytes,
            cipher_set,
            encrypted_password,
        })
    }

    /// Stored form: `needle(mode, salt, combined digest)`.
    pub fn hash_bytes(&self) -> &[u8] {
        &self.hash_bytes
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn cipher_set(&self) -> &Arc<CipherSet> {
        &self.cipher_set
    }

    /// Independent hash of the same password with a new salt and mode.
    pub fn clone_hash(&self) -> GordianResult<Self> {
        let password = Zeroizing::new(self.cipher_set.decrypt_string(&self.encrypted_password)?);
        Self::derive_new(&self.generator, SecretString::from(password.as_str()))
    }

    pub fn encrypt_string(&self, text: &str) -> GordianResult<Vec<u8>> {
        self.cipher_set.encrypt_string(text)
    }

    pub fn decrypt_string(&self, ciphertext: &[u8]) -> GordianResult<String> {
        self.cipher_set.decrypt_string(ciphertext)
    }

    pub fn secure_symmetric_key(&self, key: &SymmetricKey) -> GordianResult<Vec<u8>> {
        self.cipher_set.secure_symmetric_key(key)
    }

    pub fn derive_symmetric_key(&self, secured: &[u8]) -> GordianResult<SymmetricKey> {
        self.cipher_set.derive_symmetric_key(secured)
    }

    pub fn secure_private_key(&self, key: &AsymmetricKey) -> GordianResult<Vec<u8>> {
        self.cipher_set.secure_private_key(key)
    }

    pub fn derive_asymmetric_key(&self, secured: &[u8], external_def: &[u8]) -> GordianResult<AsymmetricKey> {
        self.cipher_set.derive_asymmetric_key(secured, external_def)
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHash")
            .field("mode", &self.mode)
            .field("hash_bytes", &self.hash_bytes.len())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Pre-stretch the password with Argon2id when the mode asks for it.
fn mac_key(
    generator: &SecurityGenerator,
    mode: &HashMode,
    salt: &[u8],
    password: &[u8],
) -> GordianResult<Zeroizing<Vec<u8>>> {
    match mode.hardening() {
        Hardening::None => Ok(Zeroizing::new(password.to_vec())),
        Hardening::Argon2id => {
            let params = generator.kdf_params();
            let argon2_params = Params::new(
                params.mem_cost_kib,
                params.time_cost,
                params.parallelism,
                Some(HARDENED_KEY),
            )
            .map_err(|e| GordianError::config(format!("invalid Argon2id params: {e}")))?;
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

            let mut key = Zeroizing::new(vec![0u8; HARDENED_KEY]);
            argon2
                .hash_password_into(password, salt, &mut key)
                .map_err(|e| GordianError::crypto(format!("Argon2id KDF failed: {e}")))?;
            Ok(key)
        }
    }
}

fn derive(
    generator: &SecurityGenerator,
    mode: &HashMode,
    salt: &[u8],
    password: &[u8],
) -> GordianResult<Derived> {
    let key = mac_key(generator, mode, salt, password)?;
    let seed = generator.security_seed();
    let base = generator.iterations();
    let [adj_prime, adj_alt, adj_secret] = mode.adjustments();
    let limit_prime = base + u32::from(adj_prime);
    let limit_alt = base + u32::from(adj_alt);
    let limit_secret = base + u32::from(adj_secret);
    let rounds = limit_prime.max(limit_alt).max(limit_secret);

    let (prime_digest, alt_digest) = (mode.prime_digest(), mode.alternate_digest());

    let mut prime = Zeroizing::new(salt.to_vec());
    let mut alternate = Zeroizing::new(salt.to_vec());
    let mut secret = Zeroizing::new(salt.to_vec());
    let mut prime_acc = Zeroizing::new(Vec::new());
    let mut alt_acc = Zeroizing::new(Vec::new());
    let mut secret_acc = Zeroizing::new(Vec::new());

    for i in 1..=rounds {
        let counter = i.to_be_bytes();
        let next_prime = if i <= limit_prime {
            let mut folds: Vec<&[u8]> = Vec::new();
            if i % PRIME_FOLD == 0 {
                folds.push(&alternate);
            }
            Some(chain_round(prime_digest, &key, b"prime", &prime, &counter, seed, &folds)?)
        } else {
            None
        };
        let next_alt = if i <= limit_alt {
            let mut folds: Vec<&[u8]> = Vec::new();
            if i % ALTERNATE_FOLD == 0 {
                folds.push(&prime);
            }
            Some(chain_round(alt_digest, &key, b"alternate", &alternate, &counter, seed, &folds)?)
        } else {
            None
        };
        let next_secret = if i <= limit_secret {
            let mut folds: Vec<&[u8]> = Vec::new();
            if i % SECRET_FOLD == 0 {
                folds.push(&prime);
                folds.push(&alternate);
            }
            Some(chain_round(alt_digest, &key, b"secret", &secret, &counter, seed, &folds)?)
        } else {
            None
        };

        if let Some(value) = next_prime {
            xor_fold(&mut prime_acc, &value);
            prime = value;
        }
        if let Some(value) = next_alt {
            xor_fold(&mut alt_acc, &value);
            alternate = value;
        }
        if let Some(value) = next_secret {
            xor_fold(&mut secret_acc, &value);
            secret = value;
        }
    }

    let mut combined = Zeroizing::new(Vec::new());
    xor_fold(&mut combined, &prime_acc);
    xor_fold(&mut combined, &alt_acc);

    let hash_bytes = HashModeNeedle {
        mode: *mode,
        salt: salt.to_vec(),
        hash: combined.to_vec(),
    }
    .encode()?;

    Ok(Derived {
        hash_bytes,
        secret: secret_acc,
    })
}

/// One MAC step of a chain. Fold-ins are the other chains' values from the start of the round.
fn chain_round(
    digest: DigestType,
    key: &[u8],
    label: &[u8],
    previous: &[u8],
    counter: &[u8],
    seed: &[u8],
    folds: &[&[u8]],
) -> GordianResult<Zeroizing<Vec<u8>>> {
    let mut mac = digest.mac_engine(key)?;
    mac.update(label);
    mac.update(previous);
    mac.update(counter);
    mac.update(seed);
    for fold in folds {
        mac.update(fold);
    }
    Ok(Zeroizing::new(mac.finalize()))
}

/// XOR `value` into `acc`, growing `acc` to the longer length.
fn xor_fold(acc: &mut Vec<u8>, value: &[u8]) {
    if acc.len() < value.len() {
        acc.resize(value.len(), 0);
    }
    for (a, v) in acc.iter_mut().zip(value) {
        *a ^= v;
    }
}
