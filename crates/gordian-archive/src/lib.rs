//! gordian-archive: authenticated archive container
//!
//! An archive is a [`container`] of named byte ranges. Each user entry is
//! written through a layered pipeline (raw digest, optional zstd, optional
//! segmented AEAD) and described by an [`ArchiveEntry`] record. All records
//! are serialized into one reserved entry, [`HEADER_ENTRY`], written last and
//! read first.
//!
//! Encrypted archives carry their own key pair: the public half and the
//! password-secured private half live in the header, each entry's symmetric
//! key is wrapped by the pair and each entry is signed over its key material
//! and digests.

pub mod container;
pub mod entry;
pub mod header;
pub mod legacy;
pub mod reader;
pub mod stream;
pub mod writer;

/// Name of the metadata entry; user entries may not use it.
pub const HEADER_ENTRY: &str = "archive.header";

pub use entry::{ArchiveEntry, ArchiveMode, EntrySummary, Measure, Properties, Property};
pub use header::ArchiveHeader;
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;
