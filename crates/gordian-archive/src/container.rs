//! Container format: named byte ranges with a trailing directory
//!
//! ```text
//! "GKAR" ‖ version(1)
//! entry data, back to back
//! directory: { u16 name len ‖ name ‖ u64 offset ‖ u64 length }*
//! trailer:   u64 directory offset ‖ u32 entry count ‖ "GKAR"
//! ```
//!
//! The writer only needs `Write`, so an archive can be streamed to a pipe.
//! The reader needs `Seek` to find the trailer.

use std::io::{self, Read, Seek, SeekFrom, Write};

use gordian_core::{GordianError, GordianResult};
use gordian_crypto::needle::ByteReader;

pub const MAGIC: &[u8; 4] = b"GKAR";
pub const VERSION: u8 = 1;

const PREAMBLE_LEN: u64 = 5;
const TRAILER_LEN: u64 = 16;

/// Location of one entry's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub offset: u64,
    pub length: u64,
}

pub struct ContainerWriter<W: Write> {
    inner: W,
    position: u64,
    directory: Vec<DirEntry>,
    open: Option<DirEntry>,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(mut inner: W) -> GordianResult<Self> {
        inner.write_all(MAGIC)?;
        inner.write_all(&[VERSION])?;
        Ok(Self {
            inner,
            position: PREAMBLE_LEN,
            directory: Vec::new(),
            open: None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.iter().any(|e| e.name == name)
            || self.open.as_ref().is_some_and(|e| e.name == name)
    }

    pub fn begin(&mut self, name: &str) -> GordianResult<()> {
        if let Some(open) = &self.open {
            return Err(GordianError::logic(format!(
                "container entry {} is still open",
                open.name
            )));
        }
        if name.is_empty() || name.len() > usize::from(u16::MAX) {
            return Err(GordianError::logic(format!("invalid entry name length: {}", name.len())));
        }
        if self.contains(name) {
            return Err(GordianError::logic(format!("duplicate entry: {name}")));
        }
        self.open = Some(DirEntry {
            name: name.to_string(),
            offset: self.position,
            length: 0,
        });
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> GordianResult<()> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| GordianError::logic("no container entry is open"))?;
        self.inner.write_all(data)?;
        open.length += data.len() as u64;
        self.position += data.len() as u64;
        Ok(())
    }

    pub fn end(&mut self) -> GordianResult<&DirEntry> {
        let entry = self
            .open
            .take()
            .ok_or_else(|| GordianError::logic("no container entry is open"))?;
        self.directory.push(entry);
        Ok(&self.directory[self.directory.len() - 1])
    }

    /// Write directory and trailer and hand back the sink.
    pub fn finish(mut self) -> GordianResult<W> {
        if self.open.is_some() {
            return Err(GordianError::logic("container entry still open at finish"));
        }
        let directory_offset = self.position;
        let mut dir = Vec::new();
        for entry in &self.directory {
            dir.extend_from_slice(&(entry.name.len() as u16).to_be_bytes());
            dir.extend_from_slice(entry.name.as_bytes());
            dir.extend_from_slice(&entry.offset.to_be_bytes());
            dir.extend_from_slice(&entry.length.to_be_bytes());
        }
        let count = u32::try_from(self.directory.len())
            .map_err(|_| GordianError::logic("too many container entries"))?;
        dir.extend_from_slice(&directory_offset.to_be_bytes());
        dir.extend_from_slice(&count.to_be_bytes());
        dir.extend_from_slice(MAGIC);
        self.inner.write_all(&dir)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct ContainerReader<R> {
    inner: R,
    directory: Vec<DirEntry>,
}

impl<R: Read + Seek> ContainerReader<R> {
    pub fn open(mut inner: R) -> GordianResult<Self> {
        let total = inner.seek(SeekFrom::End(0))?;
        if total < PREAMBLE_LEN + TRAILER_LEN {
            return Err(GordianError::data("container is too short"));
        }

        let mut preamble = [0u8; PREAMBLE_LEN as usize];
        inner.seek(SeekFrom::Start(0))?;
        inner.read_exact(&mut preamble)?;
        if &preamble[..4] != MAGIC {
            return Err(GordianError::data("not a gordian archive"));
        }
        if preamble[4] != VERSION {
            return Err(GordianError::data(format!(
                "unsupported container version {}",
                preamble[4]
            )));
        }

        let mut trailer = [0u8; TRAILER_LEN as usize];
        inner.seek(SeekFrom::Start(total - TRAILER_LEN))?;
        inner.read_exact(&mut trailer)?;
        let mut reader = ByteReader::new(&trailer);
        let directory_offset = reader.u64()?;
        let count = reader.u32()?;
        if reader.take(4)? != MAGIC {
            return Err(GordianError::data("container trailer is damaged"));
        }
        let directory_end = total - TRAILER_LEN;
        if directory_offset < PREAMBLE_LEN || directory_offset > directory_end {
            return Err(GordianError::data("container directory offset out of range"));
        }

        let mut dir = vec![0u8; (directory_end - directory_offset) as usize];
        inner.seek(SeekFrom::Start(directory_offset))?;
        inner.read_exact(&mut dir)?;
        let mut reader = ByteReader::new(&dir);
        let mut directory = Vec::new();
        for _ in 0..count {
            let name = String::from_utf8(reader.short_blob()?.to_vec())
                .map_err(|_| GordianError::data("container entry name is not UTF-8"))?;
            let offset = reader.u64()?;
            let length = reader.u64()?;
            let in_range = offset >= PREAMBLE_LEN
                && offset
                    .checked_add(length)
                    .is_some_and(|end| end <= directory_offset);
            if !in_range {
                return Err(GordianError::data(format!("container entry {name} out of range")));
            }
            if directory.iter().any(|e: &DirEntry| e.name == name) {
                return Err(GordianError::data(format!("duplicate container entry {name}")));
            }
            directory.push(DirEntry { name, offset, length });
        }
        reader.finish()?;

        Ok(Self { inner, directory })
    }

    pub fn directory(&self) -> &[DirEntry] {
        &self.directory
    }

    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.directory.iter().find(|e| e.name == name)
    }

    /// Positioned reader over one entry's bytes.
    pub fn open_entry(&mut self, name: &str) -> GordianResult<io::Take<&mut R>> {
        let entry = self
            .find(name)
            .cloned()
            .ok_or_else(|| GordianError::data(format!("no container entry named {name}")))?;
        self.inner.seek(SeekFrom::Start(entry.offset))?;
        Ok((&mut self.inner).take(entry.length))
    }

    pub fn read_entry(&mut self, name: &str) -> GordianResult<Vec<u8>> {
        let mut out = Vec::new();
        self.open_entry(name)?.read_to_end(&mut out)?;
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::HEADER_ENTRY;
    use std::io::Cursor;

    /// Lay out a container by hand, bypassing the writer's checks.
    pub(crate) fn raw_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.push(VERSION);
        let mut dir = Vec::new();
        for (name, data) in entries {
            let offset = out.len() as u64;
            out.extend_from_slice(data);
            dir.extend_from_slice(&(name.len() as u16).to_be_bytes());
            dir.extend_from_slice(name.as_bytes());
            dir.extend_from_slice(&offset.to_be_bytes());
            dir.extend_from_slice(&(data.len() as u64).to_be_bytes());
        }
        let directory_offset = out.len() as u64;
        out.extend_from_slice(&dir);
        out.extend_from_slice(&directory_offset.to_be_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        out.extend_from_slice(MAGIC);
        out
    }

    fn sample() -> Vec<u8> {
        let mut writer = ContainerWriter::new(Vec::new()).unwrap();
        writer.begin("first").unwrap();
        writer.write(b"hello ").unwrap();
        writer.write(b"world").unwrap();
        writer.end().unwrap();
        writer.begin("empty").unwrap();
        writer.end().unwrap();
        writer.begin("second").unwrap();
        writer.write(&[0xAA; 300]).unwrap();
        writer.end().unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn entries_read_back() {
        let mut reader = ContainerReader::open(Cursor::new(sample())).unwrap();
        let names: Vec<&str> = reader.directory().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["first", "empty", "second"]);
        assert_eq!(reader.read_entry("first").unwrap(), b"hello world");
        assert!(reader.read_entry("empty").unwrap().is_empty());
        assert_eq!(reader.read_entry("second").unwrap(), vec![0xAA; 300]);
        assert_eq!(reader.read_entry("first").unwrap(), b"hello world");
    }

    #[test]
    fn one_open_entry_at_a_time() {
        let mut writer = ContainerWriter::new(Vec::new()).unwrap();
        writer.begin("a").unwrap();
        assert!(matches!(writer.begin("b"), Err(GordianError::Logic(_))));
        writer.end().unwrap();
        assert!(matches!(writer.begin("a"), Err(GordianError::Logic(_))));
        assert!(matches!(writer.end(), Err(GordianError::Logic(_))));
        assert!(matches!(writer.write(b"x"), Err(GordianError::Logic(_))));
    }

    #[test]
    fn rejects_foreign_and_truncated_files() {
        let bytes = sample();
        let mut foreign = bytes.clone();
        foreign[0] = b'P';
        assert!(matches!(
            ContainerReader::open(Cursor::new(foreign)),
            Err(GordianError::Data(_))
        ));

        for cut in [0, 4, 10, bytes.len() - 1] {
            let result = ContainerReader::open(Cursor::new(bytes[..cut].to_vec()));
            assert!(result.is_err(), "prefix of {cut} bytes opened");
        }
    }

    #[test]
    fn missing_entry_is_data_error() {
        let mut reader = ContainerReader::open(Cursor::new(sample())).unwrap();
        assert!(matches!(reader.read_entry("nope"), Err(GordianError::Data(_))));
    }

    #[test]
    fn hand_built_container_opens() {
        let bytes = raw_container(&[("a", &b"alpha"[..]), ("b", &b""[..])]);
        let mut reader = ContainerReader::open(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_entry("a").unwrap(), b"alpha");
        assert!(reader.read_entry("b").unwrap().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let bytes = raw_container(&[
            (HEADER_ENTRY, &b"decoy"[..]),
            ("a", &b"x"[..]),
            (HEADER_ENTRY, &b"real"[..]),
        ]);
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes)),
            Err(GordianError::Data(_))
        ));

        let bytes = raw_container(&[("a", &b"1"[..]), ("a", &b"2"[..])]);
        assert!(matches!(
            ContainerReader::open(Cursor::new(bytes)),
            Err(GordianError::Data(_))
        ));
    }
}
