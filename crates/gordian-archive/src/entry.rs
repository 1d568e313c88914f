//! Entry metadata: archive modes, ordered property lists and per-entry records

use std::fmt;
use std::str::FromStr;

use gordian_core::{GordianError, GordianResult};
use serde::Serialize;

/// Property names used in entry records.
pub mod names {
    pub const NAME: &str = "Name";
    pub const RAW_DIGEST: &str = "RawDigest";
    pub const COMP_DIGEST: &str = "CompDigest";
    pub const ENC_DIGEST: &str = "EncDigest";
    pub const SECRET_KEY: &str = "SecretKey";
    pub const INIT_VECTOR: &str = "InitVector";
    pub const SIGNATURE: &str = "Signature";

    pub const DIGEST: &str = "Digest";
    pub const HASH_BYTES: &str = "HashBytes";
    pub const PUBLIC_KEY: &str = "PublicKey";
    pub const PRIVATE_KEY: &str = "PrivateKey";
}

/// How an entry's bytes are transformed on their way into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveMode {
    Raw,
    Compress,
    Encrypt,
    CompressAndEncrypt,
}

impl ArchiveMode {
    pub const ALL: [ArchiveMode; 4] = [
        ArchiveMode::Raw,
        ArchiveMode::Compress,
        ArchiveMode::Encrypt,
        ArchiveMode::CompressAndEncrypt,
    ];

    pub fn compresses(self) -> bool {
        matches!(self, ArchiveMode::Compress | ArchiveMode::CompressAndEncrypt)
    }

    pub fn encrypts(self) -> bool {
        matches!(self, ArchiveMode::Encrypt | ArchiveMode::CompressAndEncrypt)
    }

    pub fn name(self) -> &'static str {
        match self {
            ArchiveMode::Raw => "raw",
            ArchiveMode::Compress => "compress",
            ArchiveMode::Encrypt => "encrypt",
            ArchiveMode::CompressAndEncrypt => "compress-and-encrypt",
        }
    }

    fn from_flags(compressed: bool, encrypted: bool) -> Self {
        match (compressed, encrypted) {
            (false, false) => ArchiveMode::Raw,
            (true, false) => ArchiveMode::Compress,
            (false, true) => ArchiveMode::Encrypt,
            (true, true) => ArchiveMode::CompressAndEncrypt,
        }
    }
}

impl fmt::Display for ArchiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArchiveMode {
    type Err = GordianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArchiveMode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| GordianError::config(format!("unknown archive mode: {s}")))
    }
}

/// One property: an optional byte string and an optional number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Property {
    pub bytes: Option<Vec<u8>>,
    pub value: Option<u64>,
}

impl Property {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
            value: None,
        }
    }

    pub fn value(value: u64) -> Self {
        Self {
            bytes: None,
            value: Some(value),
        }
    }

    /// A digest together with the length of the stream it covers.
    pub fn measured(digest: Vec<u8>, length: u64) -> Self {
        Self {
            bytes: Some(digest),
            value: Some(length),
        }
    }
}

/// Insertion-ordered property list with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    items: Vec<(String, Property)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property; a name that is already present is a data error.
    pub fn insert(&mut self, name: impl Into<String>, property: Property) -> GordianResult<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(GordianError::data(format!("duplicate property: {name}")));
        }
        self.items.push((name, property));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.items
            .iter()
            .find(|(item, _)| item == name)
            .map(|(_, property)| property)
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(|p| p.bytes.as_deref())
    }

    pub fn get_value(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|p| p.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Property)> {
        self.items.iter().map(|(name, property)| (name.as_str(), property))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Digest and length of one layer of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub digest: Vec<u8>,
    pub length: u64,
}

/// Metadata record for one archive entry.
///
/// The layer measures are parsed once in [`ArchiveEntry::new`]; a record that
/// exists always has a raw measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    name: String,
    properties: Properties,
    raw: Measure,
    compressed: Option<Measure>,
    encrypted: Option<Measure>,
}

impl ArchiveEntry {
    /// Build a record, checking that the properties describe a readable entry.
    pub fn new(name: impl Into<String>, properties: Properties) -> GordianResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(GordianError::data("entry without a name"));
        }
        let raw = measure(&name, &properties, names::RAW_DIGEST)?
            .ok_or_else(|| GordianError::data(format!("entry {name} has no raw digest")))?;
        let compressed = measure(&name, &properties, names::COMP_DIGEST)?;
        let encrypted = measure(&name, &properties, names::ENC_DIGEST)?;
        if encrypted.is_some() {
            for required in [names::SECRET_KEY, names::INIT_VECTOR, names::SIGNATURE] {
                if properties.get_bytes(required).is_none() {
                    return Err(GordianError::data(format!(
                        "encrypted entry {name} is missing {required}"
                    )));
                }
            }
        }
        Ok(Self {
            name,
            properties,
            raw,
            compressed,
            encrypted,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn mode(&self) -> ArchiveMode {
        ArchiveMode::from_flags(self.compressed.is_some(), self.encrypted.is_some())
    }

    pub fn raw(&self) -> &Measure {
        &self.raw
    }

    pub fn compressed(&self) -> Option<&Measure> {
        self.compressed.as_ref()
    }

    pub fn encrypted(&self) -> Option<&Measure> {
        self.encrypted.as_ref()
    }

    /// Plaintext length.
    pub fn size(&self) -> u64 {
        self.raw().length
    }

    /// Bytes the entry occupies in the container.
    pub fn stored_size(&self) -> u64 {
        self.encrypted()
            .or(self.compressed())
            .unwrap_or(&self.raw)
            .length
    }

    pub fn secret_key(&self) -> Option<&[u8]> {
        self.properties.get_bytes(names::SECRET_KEY)
    }

    pub fn init_vector(&self) -> Option<&[u8]> {
        self.properties.get_bytes(names::INIT_VECTOR)
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.properties.get_bytes(names::SIGNATURE)
    }

    /// Bytes covered by the entry signature: wrapped key, IV, then the
    /// encrypted, compressed and raw digests, skipping absent ones.
    pub fn signature_payload(&self) -> Vec<u8> {
        signature_payload(
            self.secret_key(),
            self.init_vector(),
            self.encrypted(),
            self.compressed(),
            &self.raw,
        )
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            name: self.name.clone(),
            mode: self.mode(),
            size: self.size(),
            stored_size: self.stored_size(),
            digest: hex::encode(&self.raw.digest),
        }
    }
}

/// A layer measure needs both its digest and its length.
fn measure(entry: &str, properties: &Properties, name: &str) -> GordianResult<Option<Measure>> {
    match properties.get(name) {
        None => Ok(None),
        Some(Property {
            bytes: Some(digest),
            value: Some(length),
        }) => Ok(Some(Measure {
            digest: digest.clone(),
            length: *length,
        })),
        Some(_) => Err(GordianError::data(format!(
            "{name} of entry {entry} needs both digest and length"
        ))),
    }
}

pub(crate) fn signature_payload(
    wrapped_key: Option<&[u8]>,
    iv: Option<&[u8]>,
    encrypted: Option<&Measure>,
    compressed: Option<&Measure>,
    raw: &Measure,
) -> Vec<u8> {
    let mut payload = Vec::new();
    for part in [wrapped_key, iv].into_iter().flatten() {
        payload.extend_from_slice(part);
    }
    for measure in [encrypted, compressed, Some(raw)].into_iter().flatten() {
        payload.extend_from_slice(&measure.digest);
    }
    payload
}

/// Listing view of an entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub mode: ArchiveMode,
    pub size: u64,
    pub stored_size: u64,
    pub digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_props(digest: &[u8], len: u64) -> Properties {
        let mut props = Properties::new();
        props
            .insert(names::RAW_DIGEST, Property::measured(digest.to_vec(), len))
            .unwrap();
        props
    }

    #[test]
    fn mode_names_roundtrip() {
        for mode in ArchiveMode::ALL {
            assert_eq!(mode.name().parse::<ArchiveMode>().unwrap(), mode);
        }
        assert!(matches!(
            "zip".parse::<ArchiveMode>(),
            Err(GordianError::Config(_))
        ));
    }

    #[test]
    fn duplicate_property_is_data_error() {
        let mut props = raw_props(b"d", 1);
        let err = props
            .insert(names::RAW_DIGEST, Property::value(2))
            .unwrap_err();
        assert!(matches!(err, GordianError::Data(_)));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn properties_keep_insertion_order() {
        let mut props = Properties::new();
        props.insert("b", Property::value(1)).unwrap();
        props.insert("a", Property::value(2)).unwrap();
        let order: Vec<&str> = props.iter().map(|(name, _)| name).collect();
        assert_eq!(order, ["b", "a"]);
    }

    #[test]
    fn mode_follows_present_layers() {
        let entry = ArchiveEntry::new("plain.txt", raw_props(b"raw", 10)).unwrap();
        assert_eq!(entry.mode(), ArchiveMode::Raw);
        assert_eq!(entry.stored_size(), 10);

        let mut props = raw_props(b"raw", 10);
        props
            .insert(names::COMP_DIGEST, Property::measured(b"comp".to_vec(), 4))
            .unwrap();
        let entry = ArchiveEntry::new("small.txt", props).unwrap();
        assert_eq!(entry.mode(), ArchiveMode::Compress);
        assert_eq!(entry.stored_size(), 4);
        assert_eq!(entry.size(), 10);
    }

    #[test]
    fn encrypted_entry_requires_key_material() {
        let mut props = raw_props(b"raw", 10);
        props
            .insert(names::ENC_DIGEST, Property::measured(b"enc".to_vec(), 40))
            .unwrap();
        props.insert(names::SECRET_KEY, Property::bytes(b"wrapped".to_vec())).unwrap();
        let err = ArchiveEntry::new("secret.txt", props).unwrap_err();
        assert!(matches!(err, GordianError::Data(_)));
    }

    #[test]
    fn missing_raw_digest_is_rejected() {
        let err = ArchiveEntry::new("x", Properties::new()).unwrap_err();
        assert!(matches!(err, GordianError::Data(_)));

        let mut props = Properties::new();
        props.insert(names::RAW_DIGEST, Property::value(3)).unwrap();
        assert!(ArchiveEntry::new("x", props).is_err());
    }

    #[test]
    fn measures_are_parsed_once_at_construction() {
        let mut props = raw_props(b"raw", 10);
        props
            .insert(names::COMP_DIGEST, Property::measured(b"comp".to_vec(), 4))
            .unwrap();
        let entry = ArchiveEntry::new("m.txt", props).unwrap();
        assert_eq!(entry.raw(), &Measure { digest: b"raw".to_vec(), length: 10 });
        assert_eq!(entry.compressed().map(|m| m.length), Some(4));
        assert_eq!(entry.encrypted(), None);
        assert_eq!(entry.summary().digest, hex::encode(b"raw"));

        let mut half = raw_props(b"raw", 10);
        half.insert(names::COMP_DIGEST, Property::bytes(b"comp".to_vec())).unwrap();
        assert!(matches!(ArchiveEntry::new("m.txt", half), Err(GordianError::Data(_))));
    }

    #[test]
    fn signature_payload_skips_absent_fields() {
        let raw = Measure {
            digest: b"RAW".to_vec(),
            length: 3,
        };
        let enc = Measure {
            digest: b"ENC".to_vec(),
            length: 9,
        };
        let payload = signature_payload(Some(&b"KEY"[..]), Some(&b"IV"[..]), Some(&enc), None, &raw);
        assert_eq!(payload, b"KEYIVENCRAW");
    }
}
