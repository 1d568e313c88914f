//! Archive header: archive-level properties plus every entry record
//!
//! Binary form (default):
//!
//! ```text
//! "GKH1" ‖ properties ‖ u32 entry count ‖ { u16 name len ‖ name ‖ properties }*
//! properties = u16 count ‖ { u16 name len ‖ name ‖ u8 flags ‖ [u32 len ‖ bytes] ‖ [u64 value] }*
//! ```
//!
//! `flags` bit 0 marks a byte string, bit 1 a number. The legacy text form lives
//! in [`crate::legacy`]; [`ArchiveHeader::decode`] accepts either.

use gordian_core::{GordianError, GordianResult};
use gordian_crypto::needle::ByteReader;

use crate::entry::{ArchiveEntry, Properties, Property};
use crate::legacy;

pub const HEADER_MAGIC: &[u8; 4] = b"GKH1";

const HAS_BYTES: u8 = 0b01;
const HAS_VALUE: u8 = 0b10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub properties: Properties,
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveHeader {
    pub fn encode(&self) -> GordianResult<Vec<u8>> {
        let mut out = HEADER_MAGIC.to_vec();
        encode_properties(&mut out, &self.properties)?;
        let count = u32::try_from(self.entries.len())
            .map_err(|_| GordianError::data("too many entries"))?;
        out.extend_from_slice(&count.to_be_bytes());
        for entry in &self.entries {
            put_name(&mut out, entry.name())?;
            encode_properties(&mut out, entry.properties())?;
        }
        Ok(out)
    }

    pub fn encode_legacy(&self) -> GordianResult<Vec<u8>> {
        legacy::encode(self).map(String::into_bytes)
    }

    /// Decode either header form.
    pub fn decode(bytes: &[u8]) -> GordianResult<Self> {
        match bytes.strip_prefix(HEADER_MAGIC.as_slice()) {
            Some(body) => decode_binary(body),
            None => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| GordianError::data("archive header is neither binary nor text"))?;
                legacy::decode(text)
            }
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }
}

fn put_name(out: &mut Vec<u8>, name: &str) -> GordianResult<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| GordianError::data(format!("name too long: {} bytes", name.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn encode_properties(out: &mut Vec<u8>, properties: &Properties) -> GordianResult<()> {
    let count = u16::try_from(properties.len())
        .map_err(|_| GordianError::data("too many properties"))?;
    out.extend_from_slice(&count.to_be_bytes());
    for (name, property) in properties.iter() {
        put_name(out, name)?;
        let mut flags = 0;
        if property.bytes.is_some() {
            flags |= HAS_BYTES;
        }
        if property.value.is_some() {
            flags |= HAS_VALUE;
        }
        out.push(flags);
        if let Some(bytes) = &property.bytes {
            let len = u32::try_from(bytes.len())
                .map_err(|_| GordianError::data(format!("property {name} too large")))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(bytes);
        }
        if let Some(value) = property.value {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
    Ok(())
}

fn read_name(reader: &mut ByteReader<'_>) -> GordianResult<String> {
    String::from_utf8(reader.short_blob()?.to_vec())
        .map_err(|_| GordianError::data("header name is not UTF-8"))
}

fn decode_properties(reader: &mut ByteReader<'_>) -> GordianResult<Properties> {
    let count = reader.u16()?;
    let mut properties = Properties::new();
    for _ in 0..count {
        let name = read_name(reader)?;
        let flags = reader.u8()?;
        if flags & !(HAS_BYTES | HAS_VALUE) != 0 {
            return Err(GordianError::data(format!("property {name} has unknown flags {flags:#x}")));
        }
        let bytes = if flags & HAS_BYTES != 0 {
            Some(reader.long_blob()?.to_vec())
        } else {
            None
        };
        let value = if flags & HAS_VALUE != 0 {
            Some(reader.u64()?)
        } else {
            None
        };
        properties.insert(name, Property { bytes, value })?;
    }
    Ok(properties)
}

fn decode_binary(body: &[u8]) -> GordianResult<ArchiveHeader> {
    let mut reader = ByteReader::new(body);
    let properties = decode_properties(&mut reader)?;
    let count = reader.u32()?;
    let mut entries = Vec::new();
    for _ in 0..count {
        let name = read_name(&mut reader)?;
        let entry = ArchiveEntry::new(name, decode_properties(&mut reader)?)?;
        if entries.iter().any(|e: &ArchiveEntry| e.name() == entry.name()) {
            return Err(GordianError::data(format!("duplicate entry {}", entry.name())));
        }
        entries.push(entry);
    }
    reader.finish()?;
    Ok(ArchiveHeader {
        properties,
        entries,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entry::names;
    use proptest::prelude::*;

    pub(crate) fn sample_header() -> ArchiveHeader {
        let mut properties = Properties::new();
        properties.insert(names::DIGEST, Property::value(5)).unwrap();
        properties
            .insert(names::HASH_BYTES, Property::bytes(vec![0x01, 0x23, 0x45]))
            .unwrap();

        let mut plain = Properties::new();
        plain
            .insert(names::RAW_DIGEST, Property::measured(vec![0xAB; 32], 11))
            .unwrap();

        let mut sealed = Properties::new();
        sealed
            .insert(names::RAW_DIGEST, Property::measured(vec![0x01; 32], 4096))
            .unwrap();
        sealed
            .insert(names::COMP_DIGEST, Property::measured(vec![0x02; 32], 100))
            .unwrap();
        sealed
            .insert(names::ENC_DIGEST, Property::measured(vec![0x03; 32], 140))
            .unwrap();
        sealed.insert(names::SECRET_KEY, Property::bytes(vec![9; 48])).unwrap();
        sealed.insert(names::INIT_VECTOR, Property::bytes(vec![8; 24])).unwrap();
        sealed.insert(names::SIGNATURE, Property::bytes(vec![7; 64])).unwrap();

        ArchiveHeader {
            properties,
            entries: vec![
                ArchiveEntry::new("notes/readme.txt", plain).unwrap(),
                ArchiveEntry::new("vault.db", sealed).unwrap(),
            ],
        }
    }

    #[test]
    fn binary_roundtrip() {
        let header = sample_header();
        let bytes = header.encode().unwrap();
        assert!(bytes.starts_with(HEADER_MAGIC));
        assert_eq!(ArchiveHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn truncated_binary_is_data_error() {
        let bytes = sample_header().encode().unwrap();
        for cut in 4..bytes.len() {
            assert!(
                matches!(ArchiveHeader::decode(&bytes[..cut]), Err(GordianError::Data(_))),
                "prefix of {cut} bytes decoded"
            );
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample_header().encode().unwrap();
        bytes.push(0);
        assert!(matches!(ArchiveHeader::decode(&bytes), Err(GordianError::Data(_))));
    }

    #[test]
    fn duplicate_property_in_binary_rejected() {
        let mut out = HEADER_MAGIC.to_vec();
        out.extend_from_slice(&2u16.to_be_bytes());
        for _ in 0..2 {
            put_name(&mut out, names::DIGEST).unwrap();
            out.push(HAS_VALUE);
            out.extend_from_slice(&5u64.to_be_bytes());
        }
        out.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(ArchiveHeader::decode(&out), Err(GordianError::Data(_))));
    }

    proptest! {
        #[test]
        fn arbitrary_properties_roundtrip(
            props in proptest::collection::btree_map(
                "[A-Za-z]{1,12}",
                (proptest::option::of(proptest::collection::vec(any::<u8>(), 1..64)), proptest::option::of(any::<u64>())),
                0..8,
            )
        ) {
            let mut properties = Properties::new();
            for (name, (bytes, value)) in props {
                properties.insert(name, Property { bytes, value }).unwrap();
            }
            let header = ArchiveHeader { properties, entries: Vec::new() };
            let binary = header.encode().unwrap();
            prop_assert_eq!(&ArchiveHeader::decode(&binary).unwrap(), &header);
            let text = header.encode_legacy().unwrap();
            prop_assert_eq!(&ArchiveHeader::decode(&text).unwrap(), &header);
        }
    }
}
