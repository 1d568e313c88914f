//! Legacy text header grammar
//!
//! ```text
//! header   = record { ";" record }
//! record   = [ property { "/" property } ]
//! property = name "=" hexbytes "!" hexlong
//! ```
//!
//! The first record holds archive properties; each further record is one entry
//! whose first property is `Name`. Hex is lowercase only and byte strings need
//! an even digit count. An empty segment means the part is absent, so an empty
//! byte string cannot be expressed.

use gordian_core::{GordianError, GordianResult};

use crate::entry::{names, ArchiveEntry, Properties, Property};
use crate::header::ArchiveHeader;

const RECORD_SEP: char = ';';
const PROPERTY_SEP: char = '/';
const NAME_SEP: char = '=';
const VALUE_SEP: char = '!';

pub fn encode(header: &ArchiveHeader) -> GordianResult<String> {
    let mut records = vec![encode_record(header.properties.iter())?];
    for entry in &header.entries {
        let name = Property::bytes(entry.name().as_bytes().to_vec());
        let props = std::iter::once((names::NAME, &name)).chain(entry.properties().iter());
        records.push(encode_record(props)?);
    }
    Ok(records.join(&RECORD_SEP.to_string()))
}

fn encode_record<'a>(props: impl Iterator<Item = (&'a str, &'a Property)>) -> GordianResult<String> {
    let mut parts = Vec::new();
    for (name, property) in props {
        let reserved = [RECORD_SEP, PROPERTY_SEP, NAME_SEP, VALUE_SEP];
        if name.is_empty() || name.contains(reserved) {
            return Err(GordianError::data(format!(
                "property name {name:?} cannot be written as text"
            )));
        }
        let bytes = property.bytes.as_deref().map(hex::encode).unwrap_or_default();
        let value = property.value.map(|v| format!("{v:x}")).unwrap_or_default();
        parts.push(format!("{name}{NAME_SEP}{bytes}{VALUE_SEP}{value}"));
    }
    Ok(parts.join(&PROPERTY_SEP.to_string()))
}

pub fn decode(text: &str) -> GordianResult<ArchiveHeader> {
    let mut records = text.split(RECORD_SEP);
    let properties = decode_record(records.next().unwrap_or_default())?;

    let mut entries: Vec<ArchiveEntry> = Vec::new();
    for record in records {
        let mut props = decode_record(record)?;
        let name = take_name(&mut props)?;
        if entries.iter().any(|e| e.name() == name) {
            return Err(GordianError::data(format!("duplicate entry {name}")));
        }
        entries.push(ArchiveEntry::new(name, props)?);
    }
    Ok(ArchiveHeader {
        properties,
        entries,
    })
}

/// Split off the leading `Name` property.
fn take_name(props: &mut Properties) -> GordianResult<String> {
    let mut iter = props.iter();
    let name = match iter.next() {
        Some((names::NAME, Property { bytes: Some(bytes), value: None })) => {
            String::from_utf8(bytes.clone())
                .map_err(|_| GordianError::data("entry name is not UTF-8"))?
        }
        _ => return Err(GordianError::data("entry record must start with its Name")),
    };
    let mut rest = Properties::new();
    for (key, property) in iter {
        rest.insert(key, property.clone())?;
    }
    *props = rest;
    Ok(name)
}

fn decode_record(record: &str) -> GordianResult<Properties> {
    let mut properties = Properties::new();
    if record.is_empty() {
        return Ok(properties);
    }
    for part in record.split(PROPERTY_SEP) {
        let (name, rest) = part
            .split_once(NAME_SEP)
            .ok_or_else(|| GordianError::data(format!("property {part:?} lacks '{NAME_SEP}'")))?;
        let (bytes, value) = rest
            .split_once(VALUE_SEP)
            .ok_or_else(|| GordianError::data(format!("property {name:?} lacks '{VALUE_SEP}'")))?;
        if name.is_empty() {
            return Err(GordianError::data("empty property name"));
        }
        let property = Property {
            bytes: (!bytes.is_empty()).then(|| decode_hex(bytes)).transpose()?,
            value: (!value.is_empty()).then(|| decode_long(value)).transpose()?,
        };
        properties.insert(name, property)?;
    }
    Ok(properties)
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn decode_hex(s: &str) -> GordianResult<Vec<u8>> {
    if !is_lower_hex(s) {
        return Err(GordianError::data(format!("non-hex characters in {s:?}")));
    }
    if s.len() % 2 != 0 {
        return Err(GordianError::data("odd number of hex digits"));
    }
    hex::decode(s).map_err(|e| GordianError::data(format!("bad hex: {e}")))
}

fn decode_long(s: &str) -> GordianResult<u64> {
    if !is_lower_hex(s) || s.len() > 16 {
        return Err(GordianError::data(format!("bad hex number {s:?}")));
    }
    u64::from_str_radix(s, 16).map_err(|e| GordianError::data(format!("bad hex number: {e}")))
}
