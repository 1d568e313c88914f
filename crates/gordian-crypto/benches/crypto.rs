use gordian_core::SecurityConfig;
use gordian_crypto::{
    CipherMode, CipherSelection, CipherSet, DigestType, SecurityGenerator, SymKeyType, SymmetricKey,
};
use secrecy::SecretString;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn cipher_set() -> CipherSet {
    let mode = CipherMode {
        digest: DigestType::Sha256,
        ciphers: CipherSelection::all(),
    };
    CipherSet::build(mode, b"bench seed").unwrap()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cipher_set_encrypt(bencher: divan::Bencher, size: usize) {
    let set = cipher_set();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| set.encrypt_bytes(divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cipher_set_decrypt(bencher: divan::Bencher, size: usize) {
    let set = cipher_set();
    let data = make_data(size);
    let encrypted = set.encrypt_bytes(&data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| set.decrypt_bytes(divan::black_box(&encrypted)).unwrap());
}

#[divan::bench(args = [65536, 1048576])]
fn bench_stream_encrypt(bencher: divan::Bencher, size: usize) {
    let key = SymmetricKey::generate(SymKeyType::XChaCha20Poly1305, false);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let (mut encryptor, _iv) = key.init_encryption_stream(64 * 1024).unwrap();
            let mut out = encryptor.update(divan::black_box(&data)).unwrap();
            out.extend(encryptor.finish().unwrap());
            out
        });
}

#[divan::bench(args = [256, 2048])]
fn bench_password_hash(bencher: divan::Bencher, iterations: u32) {
    let generator = SecurityGenerator::new(&SecurityConfig {
        iterations,
        ..SecurityConfig::default()
    })
    .unwrap();
    bencher.bench(|| {
        generator
            .new_password_hash(SecretString::from("bench-passphrase"))
            .unwrap()
    });
}

fn main() {
    divan::main();
}
