//! Archive writer: one open entry at a time, each pushed through its layers
//!
//! ```text
//! caller ─► Digest(raw) ─► [zstd ─► Digest(comp)] ─► [stream AEAD ─► Digest(enc)] ─► container
//! ```
//!
//! Every layer measures what it emits, so the last digest taken always covers
//! the bytes that land in the container.

use std::io::{self, Write};

use gordian_core::{ArchiveConfig, GordianError, GordianResult};
use gordian_crypto::digest::Hasher;
use gordian_crypto::{AsymmetricKey, DigestType, PasswordHash, SecurityGenerator, StreamEncryptor};

use crate::container::ContainerWriter;
use crate::entry::{self, names, ArchiveEntry, ArchiveMode, Measure, Properties, Property};
use crate::header::ArchiveHeader;
use crate::HEADER_ENTRY;

/// Digest recorded for new archives.
pub const ENTRY_DIGEST: DigestType = DigestType::Blake3;

struct Layer {
    hasher: Hasher,
    length: u64,
}

impl Layer {
    fn new(digest: DigestType) -> Self {
        Self {
            hasher: digest.hasher(),
            length: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.length += data.len() as u64;
    }

    fn finish(self) -> Measure {
        Measure {
            digest: self.hasher.finalize(),
            length: self.length,
        }
    }
}

struct Sealing {
    stream: StreamEncryptor,
    layer: Layer,
    wrapped_key: Vec<u8>,
    iv: Vec<u8>,
}

struct Compression {
    encoder: zstd::stream::write::Encoder<'static, Vec<u8>>,
    layer: Layer,
}

struct EntryPipeline {
    name: String,
    raw: Layer,
    compression: Option<Compression>,
    sealing: Option<Sealing>,
}

struct Closed {
    tail: Vec<u8>,
    raw: Measure,
    compressed: Option<Measure>,
    encrypted: Option<(Measure, Vec<u8>, Vec<u8>)>,
}

impl EntryPipeline {
    /// Run `data` through every layer and return what goes to the container.
    fn push(&mut self, data: &[u8]) -> GordianResult<Vec<u8>> {
        self.raw.update(data);
        let compressed = match self.compression.as_mut() {
            Some(c) => {
                c.encoder.write_all(data)?;
                let out = std::mem::take(c.encoder.get_mut());
                c.layer.update(&out);
                out
            }
            None => data.to_vec(),
        };
        self.seal(compressed)
    }

    fn seal(&mut self, data: Vec<u8>) -> GordianResult<Vec<u8>> {
        match self.sealing.as_mut() {
            Some(s) => {
                let out = s.stream.update(&data)?;
                s.layer.update(&out);
                Ok(out)
            }
            None => Ok(data),
        }
    }

    fn close(mut self) -> GordianResult<Closed> {
        let mut tail = Vec::new();
        let mut compressed = None;
        if let Some(c) = self.compression.take() {
            let rest = c.encoder.finish()?;
            let mut layer = c.layer;
            layer.update(&rest);
            compressed = Some(layer.finish());
            tail = self.seal(rest)?;
        }
        let mut encrypted = None;
        if let Some(s) = self.sealing.take() {
            let last = s.stream.finish()?;
            let mut layer = s.layer;
            layer.update(&last);
            tail.extend_from_slice(&last);
            encrypted = Some((layer.finish(), s.wrapped_key, s.iv));
        }
        Ok(Closed {
            tail,
            raw: self.raw.finish(),
            compressed,
            encrypted,
        })
    }
}

struct WriterSecurity {
    generator: SecurityGenerator,
    key: AsymmetricKey,
}

/// Streams entries into a container and appends the header on [`finish`](Self::finish).
///
/// Bytes for the open entry go through the [`Write`] impl. A failure while an
/// entry is being written or closed poisons the writer: the container holds a
/// partial entry, so every later call fails with `Logic`.
pub struct ArchiveWriter<W: Write> {
    container: ContainerWriter<W>,
    compression_level: i32,
    segment_size: usize,
    legacy_header: bool,
    default_mode: ArchiveMode,
    security: Option<WriterSecurity>,
    header: ArchiveHeader,
    open: Option<EntryPipeline>,
    poisoned: Option<String>,
}

impl<W: Write> ArchiveWriter<W> {
    /// Writer without a security context; only `Raw` and `Compress` entries.
    pub fn new(inner: W, config: &ArchiveConfig) -> GordianResult<Self> {
        Self::build(inner, config, None, Properties::new())
    }

    /// Writer that can encrypt. A fresh archive key pair is generated and its
    /// private half stored under `password`'s cipher set.
    pub fn new_secured(
        inner: W,
        config: &ArchiveConfig,
        generator: &SecurityGenerator,
        password: &PasswordHash,
    ) -> GordianResult<Self> {
        let key = generator.generate_asymmetric_key()?;
        let mut properties = Properties::new();
        properties.insert(names::HASH_BYTES, Property::bytes(password.hash_bytes()))?;
        properties.insert(names::PUBLIC_KEY, Property::bytes(key.external_def()))?;
        properties.insert(
            names::PRIVATE_KEY,
            Property::bytes(password.secure_private_key(&key)?),
        )?;
        let security = WriterSecurity {
            generator: generator.clone(),
            key,
        };
        Self::build(inner, config, Some(security), properties)
    }

    fn build(
        inner: W,
        config: &ArchiveConfig,
        security: Option<WriterSecurity>,
        mut properties: Properties,
    ) -> GordianResult<Self> {
        config.validate()?;
        let default_mode = config.default_mode.parse()?;
        properties.insert(names::DIGEST, Property::value(u64::from(ENTRY_DIGEST.id())))?;
        tracing::info!(
            secured = security.is_some(),
            legacy_header = config.legacy_header,
            "creating archive"
        );
        Ok(Self {
            container: ContainerWriter::new(inner)?,
            compression_level: config.compression_level,
            segment_size: config.segment_size,
            legacy_header: config.legacy_header,
            default_mode,
            security,
            header: ArchiveHeader {
                properties,
                entries: Vec::new(),
            },
            open: None,
            poisoned: None,
        })
    }

    fn check_poisoned(&self) -> GordianResult<()> {
        match &self.poisoned {
            Some(cause) => Err(GordianError::logic(format!(
                "archive writer failed earlier: {cause}"
            ))),
            None => Ok(()),
        }
    }

    fn poison<T>(&mut self, result: GordianResult<T>) -> GordianResult<T> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "archive writer poisoned");
            self.poisoned = Some(err.to_string());
        }
        result
    }

    pub fn default_mode(&self) -> ArchiveMode {
        self.default_mode
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.header.entries
    }

    pub fn start_entry(&mut self, name: &str, mode: ArchiveMode) -> GordianResult<()> {
        self.check_poisoned()?;
        if let Some(open) = &self.open {
            return Err(GordianError::logic(format!(
                "entry {} is still open",
                open.name
            )));
        }
        if name == HEADER_ENTRY {
            return Err(GordianError::logic(format!("{HEADER_ENTRY} is a reserved name")));
        }
        let sealing = if mode.encrypts() {
            let security = self.security.as_ref().ok_or_else(|| {
                GordianError::logic("encrypted entries need a writer with a security context")
            })?;
            let key = security.generator.generate_symmetric_key();
            let wrapped_key = security.key.secure_symmetric_key(&key)?;
            let (stream, iv) = key.init_encryption_stream(self.segment_size)?;
            Some(Sealing {
                stream,
                layer: Layer::new(ENTRY_DIGEST),
                wrapped_key,
                iv,
            })
        } else {
            None
        };
        let compression = if mode.compresses() {
            Some(Compression {
                encoder: zstd::stream::write::Encoder::new(Vec::new(), self.compression_level)?,
                layer: Layer::new(ENTRY_DIGEST),
            })
        } else {
            None
        };

        self.container.begin(name)?;
        tracing::debug!(entry = name, mode = %mode, "entry opened");
        self.open = Some(EntryPipeline {
            name: name.to_string(),
            raw: Layer::new(ENTRY_DIGEST),
            compression,
            sealing,
        });
        Ok(())
    }

    fn write_entry(&mut self, data: &[u8]) -> GordianResult<()> {
        self.check_poisoned()?;
        let pipeline = self
            .open
            .as_mut()
            .ok_or_else(|| GordianError::logic("no entry is open"))?;
        let result = pipeline
            .push(data)
            .and_then(|out| self.container.write(&out));
        self.poison(result)
    }

    pub fn close_entry(&mut self) -> GordianResult<&ArchiveEntry> {
        self.check_poisoned()?;
        let pipeline = self
            .open
            .take()
            .ok_or_else(|| GordianError::logic("no entry is open"))?;
        let result = self.seal_entry(pipeline);
        let entry = self.poison(result)?;
        tracing::debug!(
            entry = entry.name(),
            size = entry.size(),
            stored = entry.stored_size(),
            "entry closed"
        );
        self.header.entries.push(entry);
        Ok(&self.header.entries[self.header.entries.len() - 1])
    }

    /// Flush the pipeline's tail into the container and build the signed record.
    fn seal_entry(&mut self, pipeline: EntryPipeline) -> GordianResult<ArchiveEntry> {
        let name = pipeline.name.clone();
        let closed = pipeline.close()?;
        self.container.write(&closed.tail)?;
        self.container.end()?;

        let mut properties = Properties::new();
        properties.insert(
            names::RAW_DIGEST,
            Property::measured(closed.raw.digest.clone(), closed.raw.length),
        )?;
        if let Some(comp) = &closed.compressed {
            properties.insert(
                names::COMP_DIGEST,
                Property::measured(comp.digest.clone(), comp.length),
            )?;
        }
        if let Some((enc, wrapped_key, iv)) = &closed.encrypted {
            let payload = entry::signature_payload(
                Some(wrapped_key.as_slice()),
                Some(iv.as_slice()),
                Some(enc),
                closed.compressed.as_ref(),
                &closed.raw,
            );
            let mut signer = self
                .security
                .as_ref()
                .ok_or_else(|| GordianError::logic("encrypted entry without a security context"))?
                .key
                .signer()?;
            signer.update(&payload);
            let signature = signer.sign()?;

            properties.insert(names::ENC_DIGEST, Property::measured(enc.digest.clone(), enc.length))?;
            properties.insert(names::SECRET_KEY, Property::bytes(wrapped_key.clone()))?;
            properties.insert(names::INIT_VECTOR, Property::bytes(iv.clone()))?;
            properties.insert(names::SIGNATURE, Property::bytes(signature))?;
        }

        ArchiveEntry::new(name, properties)
    }

    /// Write a whole entry in one call.
    pub fn add_entry(&mut self, name: &str, mode: ArchiveMode, data: &[u8]) -> GordianResult<&ArchiveEntry> {
        self.start_entry(name, mode)?;
        self.write_entry(data)?;
        self.close_entry()
    }

    /// Close any open entry, append the header entry and finish the container.
    pub fn finish(mut self) -> GordianResult<W> {
        self.check_poisoned()?;
        if self.open.is_some() {
            self.close_entry()?;
        }
        let header = if self.legacy_header {
            self.header.encode_legacy()?
        } else {
            self.header.encode()?
        };
        self.container.begin(HEADER_ENTRY)?;
        self.container.write(&header)?;
        self.container.end()?;
        tracing::info!(entries = self.header.entries.len(), "archive finished");
        self.container.finish()
    }
}

impl<W: Write> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_entry(buf).map_err(GordianError::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
