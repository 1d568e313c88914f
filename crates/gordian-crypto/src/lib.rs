//! gordian-crypto: password-derived key hierarchy for GordianKnot
//!
//! Key hierarchy:
//! ```text
//! Password + salt + HashMode
//!   └── PasswordHash (three cross-fed MAC chains, optional Argon2id pre-stretch)
//!       ├── HashBytes = needle(HashMode, salt, combined digest)      (stored, verifiable)
//!       └── CipherSet (AES-SIV / AES-GCM / XChaCha20-Poly1305 cascade, seeded by the secret chain)
//!           ├── secured private keys   = CipherSet(needle(AsymKeyMode, private key))
//!           └── secured symmetric keys = needle(SymKeyMode, CipherSet(key))
//! AsymmetricKey
//!   ├── Curve25519: X25519 agreement → per-partner CipherSet, Ed25519 signatures
//!   └── RSA-2048:   OAEP key wrap and block encryption, PKCS#1 v1.5 signatures
//! SymmetricKey
//!   ├── data cipher:   deterministic single-shot AEAD
//!   └── stream cipher: random IV, position-bound AEAD segments
//! ```

pub mod asymmetric;
pub mod cipherset;
pub mod digest;
pub mod field;
pub mod generator;
pub mod keymode;
pub mod needle;
pub mod password;
pub mod providers;
pub mod symmetric;

pub use asymmetric::{AsymKeyType, AsymmetricKey, Signer, Verifier};
pub use cipherset::CipherSet;
pub use digest::DigestType;
pub use field::{EncryptedField, FieldValue};
pub use generator::SecurityGenerator;
pub use keymode::{AsymKeyMode, CipherMode, CipherSelection, Hardening, HashMode, KeyMode, SymKeyMode};
pub use needle::{AsymModeNeedle, HashModeNeedle, SymKeyNeedle};
pub use password::{KdfParams, PasswordHash};
pub use symmetric::{
    DataCipher, StreamDecryptor, StreamEncryptor, SymKeyType, SymmetricKey, DEFAULT_SEGMENT_SIZE,
};
