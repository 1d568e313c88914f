//! Security generator: the configured factory for modes, hashes and keys

use std::sync::Arc;

use gordian_core::{GordianResult, SecurityConfig};
use rand::seq::SliceRandom;
use rand::RngCore;
use secrecy::SecretString;

use crate::asymmetric::{AsymKeyType, AsymmetricKey};
use crate::digest::DigestType;
use crate::keymode::{AsymKeyMode, CipherSelection, Hardening, HashMode};
use crate::password::{KdfParams, PasswordHash};
use crate::providers;
use crate::symmetric::{SymKeyType, SymmetricKey};

struct Settings {
    iterations: u32,
    security_seed: Vec<u8>,
    salt_length: usize,
    cipher_steps: usize,
    restricted_keys: bool,
    hardening: Hardening,
    kdf: KdfParams,
    symmetric_key_type: SymKeyType,
    asymmetric_key_type: AsymKeyType,
}

/// Cheap to clone; every clone shares the same settings.
#[derive(Clone)]
pub struct SecurityGenerator {
    settings: Arc<Settings>,
}

impl SecurityGenerator {
    pub fn new(config: &SecurityConfig) -> GordianResult<Self> {
        providers::ensure_initialized()?;
        config.validate()?;

        let settings = Settings {
            iterations: config.iterations,
            security_seed: config.security_seed.as_bytes().to_vec(),
            salt_length: config.salt_length,
            cipher_steps: usize::from(config.cipher_steps),
            restricted_keys: config.restricted_keys,
            hardening: if config.argon2_hardening {
                Hardening::Argon2id
            } else {
                Hardening::None
            },
            kdf: KdfParams {
                mem_cost_kib: config.argon2_mem_cost_kib,
                time_cost: config.argon2_time_cost,
                parallelism: config.argon2_parallelism,
            },
            symmetric_key_type: config.symmetric_key_type.parse()?,
            asymmetric_key_type: config.asymmetric_key_type.parse()?,
        };
        tracing::debug!(
            iterations = settings.iterations,
            cipher_steps = settings.cipher_steps,
            hardening = ?settings.hardening,
            "security generator ready"
        );
        Ok(Self {
            settings: Arc::new(settings),
        })
    }

    pub fn iterations(&self) -> u32 {
        self.settings.iterations
    }

    pub fn security_seed(&self) -> &[u8] {
        &self.settings.security_seed
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.settings.kdf
    }

    pub fn restricted_keys(&self) -> bool {
        self.settings.restricted_keys
    }

    pub fn new_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.settings.salt_length];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    /// Random distinct chain digests, `cipher_steps` ciphers, random adjustments.
    pub fn new_hash_mode(&self) -> GordianResult<HashMode> {
        HashMode::random(
            &mut rand::thread_rng(),
            self.settings.cipher_steps,
            self.settings.hardening,
        )
    }

    pub fn new_password_hash(&self, password: SecretString) -> GordianResult<PasswordHash> {
        PasswordHash::derive_new(self, password)
    }

    /// Verify `password` against stored hash bytes.
    pub fn derive_password_hash(&self, stored: &[u8], password: SecretString) -> GordianResult<PasswordHash> {
        PasswordHash::derive_from_stored(self, stored, password)
    }

    /// Random key of the configured type and tier.
    pub fn generate_symmetric_key(&self) -> SymmetricKey {
        SymmetricKey::generate(self.settings.symmetric_key_type, self.settings.restricted_keys)
    }

    pub fn generate_symmetric_key_of(&self, key_type: SymKeyType) -> SymmetricKey {
        SymmetricKey::generate(key_type, self.settings.restricted_keys)
    }

    /// Fresh key pair of the configured type with a random cipher-derivation mode.
    pub fn generate_asymmetric_key(&self) -> GordianResult<AsymmetricKey> {
        self.generate_asymmetric_key_of(self.settings.asymmetric_key_type)
    }

    pub fn generate_asymmetric_key_of(&self, key_type: AsymKeyType) -> GordianResult<AsymmetricKey> {
        let mut rng = rand::thread_rng();
        let digest = *DigestType::ALL.choose(&mut rng).unwrap_or(&DigestType::Sha256);
        let ciphers: Vec<SymKeyType> = SymKeyType::ALL
            .choose_multiple(&mut rng, self.settings.cipher_steps)
            .copied()
            .collect();
        let mode = AsymKeyMode::new(key_type, digest, CipherSelection::from_types(&ciphers)?);
        let key = AsymmetricKey::generate(mode)?;
        tracing::debug!(key_type = %key_type, "generated asymmetric key");
        Ok(key)
    }
}
