//! One-time primitive self-test
//!
//! Runs known-answer checks of the digest engine the first time any generator
//! is built. The outcome is cached for the life of the process, so a broken
//! primitive fails every construction instead of only the first one.

use gordian_core::{GordianError, GordianResult};
use once_cell::sync::OnceCell;

use crate::digest::DigestType;

static SELF_TEST: OnceCell<Result<(), String>> = OnceCell::new();

const SHA256_ABC: [u8; 32] = [
    0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22,
    0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00,
    0x15, 0xad,
];

// RFC 4231 test case 2
const HMAC_SHA256_JEFE: [u8; 32] = [
    0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75,
    0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec,
    0x38, 0x43,
];

/// Run the self-test exactly once; later calls return the cached outcome.
pub fn ensure_initialized() -> GordianResult<()> {
    SELF_TEST
        .get_or_init(|| {
            let outcome = run_self_test();
            match &outcome {
                Ok(()) => tracing::debug!("crypto self-test passed"),
                Err(e) => tracing::error!(error = %e, "crypto self-test failed"),
            }
            outcome
        })
        .clone()
        .map_err(GordianError::Crypto)
}

fn run_self_test() -> Result<(), String> {
    if DigestType::Sha256.digest(b"abc") != SHA256_ABC {
        return Err("SHA-256 known answer mismatch".into());
    }
    let mac = DigestType::Sha256
        .mac(b"Jefe", b"what do ya want for nothing?")
        .map_err(|e| e.to_string())?;
    if mac != HMAC_SHA256_JEFE {
        return Err("HMAC-SHA-256 known answer mismatch".into());
    }
    for digest in DigestType::ALL {
        let a = digest.digest(b"gordian");
        if a.len() != digest.output_len() || a != digest.digest(b"gordian") {
            return Err(format!("{digest:?} is not deterministic"));
        }
        if a == digest.digest(b"gordiaN") {
            return Err(format!("{digest:?} ignores its input"));
        }
    }
    Ok(())
}
