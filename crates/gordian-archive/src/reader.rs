//! Archive reader: header first, then verified per-entry streams

use std::io::{Read, Seek};

use gordian_core::{GordianError, GordianResult};
use gordian_crypto::{AsymmetricKey, DigestType, PasswordHash, StreamDecryptor};

use crate::container::ContainerReader;
use crate::entry::{names, ArchiveEntry, EntrySummary};
use crate::header::ArchiveHeader;
use crate::stream::{DecryptReader, DigestReader};
use crate::HEADER_ENTRY;

pub struct ArchiveReader<R> {
    container: ContainerReader<R>,
    header: ArchiveHeader,
    digest: DigestType,
    public_key: Option<AsymmetricKey>,
    key: Option<AsymmetricKey>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Parse the container and its header. An archive without a readable
    /// header is unusable.
    pub fn open(inner: R) -> GordianResult<Self> {
        let mut container = ContainerReader::open(inner)?;
        match container.directory().last() {
            Some(last) if last.name == HEADER_ENTRY => {}
            _ => return Err(GordianError::data("archive header missing")),
        }
        let header = ArchiveHeader::decode(&container.read_entry(HEADER_ENTRY)?)?;

        for entry in &header.entries {
            if entry.name() == HEADER_ENTRY || container.find(entry.name()).is_none() {
                return Err(GordianError::data(format!(
                    "header lists {} but the container does not hold it",
                    entry.name()
                )));
            }
        }

        let digest = match header.properties.get_value(names::DIGEST) {
            None => DigestType::Blake3,
            Some(id) => u8::try_from(id)
                .ok()
                .and_then(|id| DigestType::from_id(id).ok())
                .ok_or_else(|| GordianError::data(format!("unknown entry digest {id}")))?,
        };
        let public_key = header
            .properties
            .get_bytes(names::PUBLIC_KEY)
            .map(AsymmetricKey::from_external)
            .transpose()?;

        tracing::info!(
            entries = header.entries.len(),
            encrypted = public_key.is_some(),
            "archive opened"
        );
        Ok(Self {
            container,
            header,
            digest,
            public_key,
            key: None,
        })
    }

    /// Stored password hash of an encrypted archive.
    pub fn hash_bytes(&self) -> Option<&[u8]> {
        self.header.properties.get_bytes(names::HASH_BYTES)
    }

    pub fn is_encrypted(&self) -> bool {
        self.hash_bytes().is_some()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Recover the archive key pair with a verified password hash.
    pub fn unlock(&mut self, password: &PasswordHash) -> GordianResult<()> {
        let stored = self
            .hash_bytes()
            .ok_or_else(|| GordianError::logic("archive is not encrypted"))?;
        if stored != password.hash_bytes() {
            return Err(GordianError::Authentication);
        }
        let (public, private) = match (
            self.header.properties.get_bytes(names::PUBLIC_KEY),
            self.header.properties.get_bytes(names::PRIVATE_KEY),
        ) {
            (Some(public), Some(private)) => (public, private),
            _ => return Err(GordianError::data("archive key pair missing from header")),
        };
        let key = password.derive_asymmetric_key(private, public)?;
        tracing::debug!("archive unlocked");
        self.key = Some(key);
        Ok(())
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.header.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.header.entry(name)
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.header.entries.iter().map(ArchiveEntry::summary).collect()
    }

    /// Check an encrypted entry's signature with the archive public key.
    pub fn verify_signature(&self, entry: &ArchiveEntry) -> GordianResult<()> {
        let signature = entry
            .signature()
            .ok_or_else(|| GordianError::logic(format!("entry {} is not signed", entry.name())))?;
        let public_key = self
            .public_key
            .as_ref()
            .ok_or_else(|| GordianError::data("signed entry in an archive without a public key"))?;
        let mut verifier = public_key.verifier();
        verifier.update(&entry.signature_payload());
        verifier.verify(signature).inspect_err(|_| {
            tracing::warn!(entry = entry.name(), "entry signature rejected");
        })
    }

    fn decryptor(&self, entry: &ArchiveEntry) -> GordianResult<StreamDecryptor> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| GordianError::logic("archive is locked; unlock it first"))?;
        self.verify_signature(entry)?;
        let (wrapped, iv) = match (entry.secret_key(), entry.init_vector()) {
            (Some(wrapped), Some(iv)) => (wrapped, iv),
            _ => return Err(GordianError::data(format!("entry {} lacks key material", entry.name()))),
        };
        key.derive_symmetric_key(wrapped)?.init_decryption_stream(iv)
    }

    /// Stream an entry's plaintext. Every layer verifies its digest and
    /// length at EOF, so read to the end before using the data.
    pub fn entry_reader(&mut self, name: &str) -> GordianResult<Box<dyn Read + '_>> {
        let entry = self
            .header
            .entry(name)
            .cloned()
            .ok_or_else(|| GordianError::data(format!("no entry named {name}")))?;
        let decryptor = match entry.encrypted() {
            Some(_) => Some(self.decryptor(&entry)?),
            None => None,
        };
        let digest = self.digest;

        let mut stream: Box<dyn Read + '_> = Box::new(self.container.open_entry(entry.name())?);
        if let (Some(decryptor), Some(enc)) = (decryptor, entry.encrypted()) {
            let measured = DigestReader::new(stream, "encrypted", digest, enc.clone());
            stream = Box::new(DecryptReader::new(measured, decryptor));
        }
        if let Some(comp) = entry.compressed() {
            let measured = DigestReader::new(stream, "compressed", digest, comp.clone());
            stream = Box::new(zstd::stream::read::Decoder::new(measured)?);
        }
        Ok(Box::new(DigestReader::new(stream, "raw", digest, entry.raw().clone())))
    }

    /// Read and verify a whole entry.
    pub fn read_entry(&mut self, name: &str) -> GordianResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut reader = self.entry_reader(name)?;
        reader.read_to_end(&mut out).map_err(GordianError::from_io)?;
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.container.into_inner()
    }
}
