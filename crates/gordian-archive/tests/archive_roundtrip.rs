use std::fs::File;
use std::io::{Cursor, Write};

use gordian_archive::container::ContainerReader;
use gordian_archive::{ArchiveMode, ArchiveReader, ArchiveWriter, HEADER_ENTRY};
use gordian_core::{ArchiveConfig, GordianError, SecurityConfig};
use gordian_crypto::{PasswordHash, SecurityGenerator};
use secrecy::SecretString;

const PASSWORD: &str = "Sekrit123!";

fn generator() -> SecurityGenerator {
    SecurityGenerator::new(&SecurityConfig {
        iterations: 32,
        ..SecurityConfig::default()
    })
    .unwrap()
}

fn small_segments() -> ArchiveConfig {
    ArchiveConfig {
        segment_size: 4096,
        ..ArchiveConfig::default()
    }
}

fn sample_entries() -> Vec<(&'static str, ArchiveMode, Vec<u8>)> {
    let text = b"the quick brown fox jumps over the lazy dog\n".repeat(500);
    let noise: Vec<u8> = (0..20_000u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
        .collect();
    vec![
        ("raw.bin", ArchiveMode::Raw, noise.clone()),
        ("docs/readme.txt", ArchiveMode::Compress, text.clone()),
        ("secret.bin", ArchiveMode::Encrypt, noise),
        ("docs/secret.txt", ArchiveMode::CompressAndEncrypt, text),
        ("empty.txt", ArchiveMode::CompressAndEncrypt, Vec::new()),
    ]
}

fn write_archive(
    config: &ArchiveConfig,
    generator: &SecurityGenerator,
    hash: &PasswordHash,
) -> Vec<u8> {
    let mut writer = ArchiveWriter::new_secured(Vec::new(), config, generator, hash).unwrap();
    for (name, mode, data) in sample_entries() {
        writer.start_entry(name, mode).unwrap();
        for chunk in data.chunks(1000) {
            writer.write_all(chunk).unwrap();
        }
        writer.close_entry().unwrap();
    }
    writer.finish().unwrap()
}

fn unlocked(bytes: Vec<u8>, generator: &SecurityGenerator) -> ArchiveReader<Cursor<Vec<u8>>> {
    let mut reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
    let stored = reader.hash_bytes().unwrap().to_vec();
    let hash = generator
        .derive_password_hash(&stored, SecretString::from(PASSWORD))
        .unwrap();
    reader.unlock(&hash).unwrap();
    reader
}

#[test]
fn mixed_modes_roundtrip_through_file() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let bytes = write_archive(&small_segments(), &generator, &hash);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundle.gkar");
    File::create(&path).unwrap().write_all(&bytes).unwrap();

    let mut reader = ArchiveReader::open(File::open(&path).unwrap()).unwrap();
    assert!(reader.is_encrypted());
    let stored = reader.hash_bytes().unwrap().to_vec();
    assert_eq!(stored, hash.hash_bytes());
    let verified = generator
        .derive_password_hash(&stored, SecretString::from(PASSWORD))
        .unwrap();
    reader.unlock(&verified).unwrap();

    for (name, mode, data) in sample_entries() {
        let entry = reader.entry(name).unwrap();
        assert_eq!(entry.mode(), mode);
        assert_eq!(entry.size(), data.len() as u64);
        assert_eq!(reader.read_entry(name).unwrap(), data, "{name}");
    }
}

#[test]
fn flipped_byte_fails_only_the_encrypted_entry() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let pristine = write_archive(&small_segments(), &generator, &hash);

    let target = ContainerReader::open(Cursor::new(pristine.clone()))
        .unwrap()
        .find("secret.bin")
        .cloned()
        .unwrap();
    let positions = [
        target.offset,
        target.offset + 3,
        target.offset + 4,
        target.offset + target.length / 2,
        target.offset + target.length - 1,
    ];

    for position in positions {
        let mut bytes = pristine.clone();
        bytes[position as usize] ^= 0x01;
        let mut reader = unlocked(bytes, &generator);
        let result = reader.read_entry("secret.bin");
        assert!(
            matches!(result, Err(GordianError::Integrity(_))),
            "flip at {position} gave {result:?}"
        );
        for (name, _, data) in sample_entries() {
            if name != "secret.bin" {
                assert_eq!(reader.read_entry(name).unwrap(), data, "{name}");
            }
        }
    }
}

#[test]
fn tampered_key_material_fails_signature_before_decrypting() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let mut bytes = write_archive(&ArchiveConfig::default(), &generator, &hash);

    let reader = ArchiveReader::open(Cursor::new(bytes.clone())).unwrap();
    let entry = reader.entry("docs/secret.txt").unwrap();
    reader.verify_signature(entry).unwrap();
    let iv = entry.init_vector().unwrap().to_vec();

    let at = bytes
        .windows(iv.len())
        .position(|window| window == iv.as_slice())
        .unwrap();
    bytes[at] ^= 0x80;

    let mut reader = unlocked(bytes, &generator);
    let entry = reader.entry("docs/secret.txt").unwrap().clone();
    assert!(matches!(reader.verify_signature(&entry), Err(GordianError::Integrity(_))));
    assert!(matches!(
        reader.read_entry("docs/secret.txt"),
        Err(GordianError::Integrity(_))
    ));
    assert!(reader.read_entry("docs/readme.txt").is_ok());
}

#[test]
fn wrong_password_is_authentication_failure() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let bytes = write_archive(&ArchiveConfig::default(), &generator, &hash);

    let mut reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
    let stored = reader.hash_bytes().unwrap().to_vec();
    assert!(matches!(
        generator.derive_password_hash(&stored, SecretString::from("wrongpass")),
        Err(GordianError::Authentication)
    ));

    let other = generator
        .new_password_hash(SecretString::from("wrongpass"))
        .unwrap();
    assert!(matches!(reader.unlock(&other), Err(GordianError::Authentication)));
    assert!(!reader.is_unlocked());
}

#[test]
fn locked_archive_still_serves_plain_entries() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let bytes = write_archive(&ArchiveConfig::default(), &generator, &hash);

    let mut reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
    assert!(matches!(reader.read_entry("secret.bin"), Err(GordianError::Logic(_))));
    assert!(reader.read_entry("raw.bin").is_ok());
    assert!(reader.read_entry("docs/readme.txt").is_ok());
}

#[test]
fn legacy_text_header_reads_back() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let config = ArchiveConfig {
        legacy_header: true,
        ..small_segments()
    };
    let bytes = write_archive(&config, &generator, &hash);

    let header = ContainerReader::open(Cursor::new(bytes.clone()))
        .unwrap()
        .read_entry(HEADER_ENTRY)
        .unwrap();
    let text = String::from_utf8(header).unwrap();
    assert!(text.contains(";Name="));
    assert!(text.starts_with("HashBytes="));

    let mut reader = unlocked(bytes, &generator);
    for (name, _, data) in sample_entries() {
        assert_eq!(reader.read_entry(name).unwrap(), data, "{name}");
    }
}

#[test]
fn rsa_archive_key_roundtrip() {
    let generator = SecurityGenerator::new(&SecurityConfig {
        iterations: 32,
        asymmetric_key_type: "rsa2048".into(),
        symmetric_key_type: "aes-siv".into(),
        ..SecurityConfig::default()
    })
    .unwrap();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let bytes = write_archive(&ArchiveConfig::default(), &generator, &hash);

    let mut reader = unlocked(bytes, &generator);
    for (name, _, data) in sample_entries() {
        assert_eq!(reader.read_entry(name).unwrap(), data, "{name}");
    }
}

#[test]
fn second_open_entry_is_rejected() {
    let generator = generator();
    let hash = generator.new_password_hash(SecretString::from(PASSWORD)).unwrap();
    let mut writer =
        ArchiveWriter::new_secured(Vec::new(), &ArchiveConfig::default(), &generator, &hash).unwrap();
    writer.start_entry("one", ArchiveMode::Encrypt).unwrap();
    assert!(matches!(
        writer.start_entry("two", ArchiveMode::Raw),
        Err(GordianError::Logic(_))
    ));
    writer.write_all(b"payload").unwrap();
    // finish closes the open entry
    let bytes = writer.finish().unwrap();
    let mut reader = unlocked(bytes, &generator);
    assert_eq!(reader.read_entry("one").unwrap(), b"payload");
}
