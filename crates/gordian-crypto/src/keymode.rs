//! Packed algorithm descriptors
//!
//! A `KeyMode` is a `u32` of eight nibbles, most significant first:
//! ```text
//! [version][digest1][digest2][key_type][param1][param2][param3][hardening]
//! ```
//! `version` is always 0. Digest slots hold a `DigestType` id or 0 when unused,
//! params hold 1-15 when used. The typed views (`HashMode`, `AsymKeyMode`,
//! `SymKeyMode`) give each slot its meaning.

use gordian_core::{GordianError, GordianResult};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::asymmetric::AsymKeyType;
use crate::digest::DigestType;
use crate::symmetric::SymKeyType;

pub const KEY_MODE_VERSION: u8 = 0;

/// Size of a serialized `KeyMode`.
pub const KEY_MODE_BYTES: usize = 4;

const NIBBLE_MAX: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyMode {
    digest1: Option<DigestType>,
    digest2: Option<DigestType>,
    key_type: u8,
    params: [u8; 3],
    hardening: u8,
}

impl KeyMode {
    pub fn new(
        digest1: Option<DigestType>,
        digest2: Option<DigestType>,
        key_type: u8,
        params: [u8; 3],
        hardening: u8,
    ) -> GordianResult<Self> {
        if key_type == 0 || key_type > NIBBLE_MAX {
            return Err(GordianError::config(format!("key type {key_type} does not fit a nibble")));
        }
        if params.iter().chain([&hardening]).any(|p| *p > NIBBLE_MAX) {
            return Err(GordianError::config("key mode parameter does not fit a nibble"));
        }
        Ok(Self {
            digest1,
            digest2,
            key_type,
            params,
            hardening,
        })
    }

    pub fn digest1(&self) -> Option<DigestType> {
        self.digest1
    }

    pub fn digest2(&self) -> Option<DigestType> {
        self.digest2
    }

    pub fn key_type(&self) -> u8 {
        self.key_type
    }

    pub fn params(&self) -> [u8; 3] {
        self.params
    }

    pub fn hardening(&self) -> u8 {
        self.hardening
    }

    pub fn packed(&self) -> u32 {
        let nibbles = [
            KEY_MODE_VERSION,
            self.digest1.map_or(0, DigestType::id),
            self.digest2.map_or(0, DigestType::id),
            self.key_type,
            self.params[0],
            self.params[1],
            self.params[2],
            self.hardening,
        ];
        nibbles
            .iter()
            .fold(0u32, |acc, nibble| (acc << 4) | u32::from(*nibble))
    }

    pub fn from_packed(value: u32) -> GordianResult<Self> {
        let nibble = |i: u32| ((value >> (28 - 4 * i)) & 0x0F) as u8;

        let version = nibble(0);
        if version != KEY_MODE_VERSION {
            return Err(GordianError::data(format!("unsupported key mode version {version}")));
        }
        let digest = |id: u8| -> GordianResult<Option<DigestType>> {
            match id {
                0 => Ok(None),
                id => DigestType::from_id(id)
                    .map(Some)
                    .map_err(|_| GordianError::data(format!("unknown digest id {id} in key mode"))),
            }
        };
        let key_type = nibble(3);
        if key_type == 0 {
            return Err(GordianError::data("key mode without key type"));
        }
        Ok(Self {
            digest1: digest(nibble(1))?,
            digest2: digest(nibble(2))?,
            key_type,
            params: [nibble(4), nibble(5), nibble(6)],
            hardening: nibble(7),
        })
    }

    pub fn to_bytes(&self) -> [u8; KEY_MODE_BYTES] {
        self.packed().to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> GordianResult<Self> {
        let raw: [u8; KEY_MODE_BYTES] = bytes
            .try_into()
            .map_err(|_| GordianError::data(format!("key mode must be 4 bytes, got {}", bytes.len())))?;
        Self::from_packed(u32::from_be_bytes(raw))
    }
}

/// Set of symmetric algorithms a cipher set chains, as a bitmask (bit = id - 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSelection(u8);

impl CipherSelection {
    pub fn from_types(types: &[SymKeyType]) -> GordianResult<Self> {
        let mask = types.iter().fold(0u8, |acc, t| acc | (1 << (t.id() - 1)));
        Self::from_mask(mask)
    }

    pub fn from_mask(mask: u8) -> GordianResult<Self> {
        let all = SymKeyType::ALL.iter().fold(0u8, |acc, t| acc | (1 << (t.id() - 1)));
        if mask == 0 || mask & !all != 0 {
            return Err(GordianError::data(format!("invalid cipher selection mask {mask:#x}")));
        }
        Ok(Self(mask))
    }

    pub fn all() -> Self {
        Self(SymKeyType::ALL.iter().fold(0u8, |acc, t| acc | (1 << (t.id() - 1))))
    }

    pub fn mask(&self) -> u8 {
        self.0
    }

    /// Selected algorithms in ascending id order.
    pub fn types(&self) -> Vec<SymKeyType> {
        SymKeyType::ALL
            .into_iter()
            .filter(|t| self.0 & (1 << (t.id() - 1)) != 0)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Password pre-stretch applied before the digest chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Hardening {
    None = 0,
    Argon2id = 1,
}

impl Hardening {
    fn from_id(id: u8) -> GordianResult<Self> {
        match id {
            0 => Ok(Hardening::None),
            1 => Ok(Hardening::Argon2id),
            other => Err(GordianError::data(format!("unknown hardening id {other}"))),
        }
    }
}

/// Everything a `CipherSet` needs to know to derive its layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherMode {
    pub digest: DigestType,
    pub ciphers: CipherSelection,
}

/// Mode of a password hash: chain digests, cipher set and work-factor adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashMode {
    prime: DigestType,
    alternate: DigestType,
    ciphers: CipherSelection,
    adjustments: [u8; 3],
    hardening: Hardening,
}

impl HashMode {
    pub fn new(
        prime: DigestType,
        alternate: DigestType,
        ciphers: CipherSelection,
        adjustments: [u8; 3],
        hardening: Hardening,
    ) -> GordianResult<Self> {
        if adjustments.iter().any(|a| *a == 0 || *a > NIBBLE_MAX) {
            return Err(GordianError::config("iteration adjustments must be 1..=15"));
        }
        Ok(Self {
            prime,
            alternate,
            ciphers,
            adjustments,
            hardening,
        })
    }

    /// Pick distinct chain digests, `steps` ciphers and random adjustments.
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        steps: usize,
        hardening: Hardening,
    ) -> GordianResult<Self> {
        let digests: Vec<DigestType> = DigestType::ALL.choose_multiple(rng, 2).copied().collect();
        let ciphers: Vec<SymKeyType> = SymKeyType::ALL
            .choose_multiple(rng, steps.clamp(1, SymKeyType::ALL.len()))
            .copied()
            .collect();
        let adjustments = [
            rng.gen_range(1..=NIBBLE_MAX),
            rng.gen_range(1..=NIBBLE_MAX),
            rng.gen_range(1..=NIBBLE_MAX),
        ];
        Self::new(
            digests[0],
            digests[1],
            CipherSelection::from_types(&ciphers)?,
            adjustments,
            hardening,
        )
    }

    pub fn prime_digest(&self) -> DigestType {
        self.prime
    }

    pub fn alternate_digest(&self) -> DigestType {
        self.alternate
    }

    pub fn ciphers(&self) -> CipherSelection {
        self.ciphers
    }

    /// Extra rounds for the prime, alternate and secret chains.
    pub fn adjustments(&self) -> [u8; 3] {
        self.adjustments
    }

    pub fn hardening(&self) -> Hardening {
        self.hardening
    }

    pub fn cipher_mode(&self) -> CipherMode {
        CipherMode {
            digest: self.prime,
            ciphers: self.ciphers,
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        KeyMode {
            digest1: Some(self.prime),
            digest2: Some(self.alternate),
            key_type: self.ciphers.mask(),
            params: self.adjustments,
            hardening: self.hardening as u8,
        }
    }

    pub fn from_key_mode(mode: KeyMode) -> GordianResult<Self> {
        let (Some(prime), Some(alternate)) = (mode.digest1, mode.digest2) else {
            return Err(GordianError::data("hash mode requires two digests"));
        };
        if mode.params.iter().any(|a| *a == 0) {
            return Err(GordianError::data("hash mode has an empty iteration adjustment"));
        }
        Ok(Self {
            prime,
            alternate,
            ciphers: CipherSelection::from_mask(mode.key_type)?,
            adjustments: mode.params,
            hardening: Hardening::from_id(mode.hardening)?,
        })
    }
}

/// Mode of an asymmetric key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsymKeyMode {
    key_type: AsymKeyType,
    digest: DigestType,
    ciphers: CipherSelection,
}

impl AsymKeyMode {
    pub fn new(key_type: AsymKeyType, digest: DigestType, ciphers: CipherSelection) -> Self {
        Self {
            key_type,
            digest,
            ciphers,
        }
    }

    pub fn key_type(&self) -> AsymKeyType {
        self.key_type
    }

    pub fn is_elliptic(&self) -> bool {
        self.key_type.is_elliptic()
    }

    pub fn cipher_mode(&self) -> CipherMode {
        CipherMode {
            digest: self.digest,
            ciphers: self.ciphers,
        }
    }

    pub fn key_mode(&self) -> KeyMode {
        KeyMode {
            digest1: Some(self.digest),
            digest2: None,
            key_type: self.key_type.id(),
            params: [self.ciphers.mask(), 0, 0],
            hardening: 0,
        }
    }

    pub fn from_key_mode(mode: KeyMode) -> GordianResult<Self> {
        let digest = mode
            .digest1
            .ok_or_else(|| GordianError::data("asymmetric key mode requires a digest"))?;
        Ok(Self {
            key_type: AsymKeyType::from_id(mode.key_type)?,
            digest,
            ciphers: CipherSelection::from_mask(mode.params[0])?,
        })
    }
}

/// Mode of a symmetric key: algorithm plus key-length tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymKeyMode {
    pub key_type: SymKeyType,
    pub restricted: bool,
}

impl SymKeyMode {
    pub fn key_mode(&self) -> KeyMode {
        KeyMode {
            digest1: None,
            digest2: None,
            key_type: self.key_type.id(),
            params: [if self.restricted { 1 } else { 2 }, 0, 0],
            hardening: 0,
        }
    }

    pub fn from_key_mode(mode: KeyMode) -> GordianResult<Self> {
        let restricted = match mode.params[0] {
            1 => true,
            2 => false,
            other => return Err(GordianError::data(format!("unknown key length tier {other}"))),
        };
        Ok(Self {
            key_type: SymKeyType::from_id(mode.key_type)?,
            restricted,
        })
    }
}
