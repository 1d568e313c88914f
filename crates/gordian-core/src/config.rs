use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GordianError, GordianResult};

/// Top-level configuration (loaded from gordian.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GordianConfig {
    pub security: SecurityConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
}

/// Key hierarchy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base iteration count of the password digest chains (default: 2048)
    pub iterations: u32,
    /// Per-install phrase mixed into every derivation round
    pub security_seed: String,
    /// Salt length in bytes for new password hashes (default: 32)
    pub salt_length: usize,
    /// Number of symmetric algorithms chained in a new cipher set (1-3)
    pub cipher_steps: u8,
    /// Use 128-bit keys where the algorithm offers them
    pub restricted_keys: bool,
    /// Pre-stretch passwords with Argon2id for new hashes
    pub argon2_hardening: bool,
    /// Argon2id memory cost in KiB (default: 19456 = 19 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 1)
    pub argon2_parallelism: u32,
    /// Symmetric key type for per-entry keys: "aes-siv", "aes-gcm" or "xchacha20-poly1305"
    pub symmetric_key_type: String,
    /// Asymmetric key type for archive keys: "curve25519" or "rsa2048"
    pub asymmetric_key_type: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            iterations: 2048,
            security_seed: "gordian-knot".into(),
            salt_length: 32,
            cipher_steps: 3,
            restricted_keys: false,
            argon2_hardening: false,
            argon2_mem_cost_kib: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            symmetric_key_type: "xchacha20-poly1305".into(),
            asymmetric_key_type: "curve25519".into(),
        }
    }
}

/// Archive writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Entry mode when the caller does not pick one:
    /// "raw", "compress", "encrypt" or "compress-and-encrypt"
    pub default_mode: String,
    /// zstd compression level (1-21)
    pub compression_level: i32,
    /// Plaintext bytes per encrypted stream segment
    pub segment_size: usize,
    /// Write the header in the legacy delimited text form
    pub legacy_header: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            default_mode: "compress-and-encrypt".into(),
            compression_level: 3,
            segment_size: 64 * 1024,
            legacy_header: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl GordianConfig {
    /// Parse a TOML document; missing tables and keys fall back to defaults.
    pub fn from_toml_str(content: &str) -> GordianResult<Self> {
        let config: GordianConfig = toml::from_str(content)
            .map_err(|e| GordianError::config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, using defaults when the file does not exist.
    pub fn load(path: &Path) -> GordianResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> GordianResult<()> {
        self.security.validate()?;
        self.archive.validate()
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> GordianResult<()> {
        if self.iterations == 0 {
            return Err(GordianError::config("security.iterations must be positive"));
        }
        if self.security_seed.is_empty() {
            return Err(GordianError::config("security.security_seed must not be empty"));
        }
        if !(16..=48).contains(&self.salt_length) {
            return Err(GordianError::config(format!(
                "security.salt_length {} outside 16..=48",
                self.salt_length
            )));
        }
        if !(1..=3).contains(&self.cipher_steps) {
            return Err(GordianError::config(format!(
                "security.cipher_steps {} outside 1..=3",
                self.cipher_steps
            )));
        }
        Ok(())
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> GordianResult<()> {
        if !(1..=21).contains(&self.compression_level) {
            return Err(GordianError::config(format!(
                "archive.compression_level {} outside 1..=21",
                self.compression_level
            )));
        }
        // The stream frame header keeps 31 bits for the sealed length.
        if self.segment_size == 0 || self.segment_size > (1 << 24) {
            return Err(GordianError::config(format!(
                "archive.segment_size {} outside 1..=16MiB",
                self.segment_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[security]
iterations = 4096
security_seed = "install-42"
salt_length = 24
cipher_steps = 2
restricted_keys = true
argon2_hardening = true
symmetric_key_type = "aes-gcm"
asymmetric_key_type = "rsa2048"

[archive]
default_mode = "compress"
compression_level = 9
segment_size = 4096
legacy_header = true

[logging]
level = "debug"
format = "json"
"#;
        let config = GordianConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.security.iterations, 4096);
        assert_eq!(config.security.security_seed, "install-42");
        assert_eq!(config.security.salt_length, 24);
        assert_eq!(config.security.cipher_steps, 2);
        assert!(config.security.restricted_keys);
        assert!(config.security.argon2_hardening);
        assert_eq!(config.security.symmetric_key_type, "aes-gcm");
        assert_eq!(config.archive.default_mode, "compress");
        assert_eq!(config.archive.compression_level, 9);
        assert!(config.archive.legacy_header);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = GordianConfig::from_toml_str("").unwrap();

        assert_eq!(config.security.iterations, 2048);
        assert_eq!(config.security.salt_length, 32);
        assert_eq!(config.security.cipher_steps, 3);
        assert!(!config.security.restricted_keys);
        assert_eq!(config.security.asymmetric_key_type, "curve25519");
        assert_eq!(config.archive.default_mode, "compress-and-encrypt");
        assert_eq!(config.archive.segment_size, 65536);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[security]
iterations = 16
"#;
        let config = GordianConfig::from_toml_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.security.iterations, 16);
        // Defaults
        assert_eq!(config.security.security_seed, "gordian-knot");
        assert_eq!(config.archive.compression_level, 3);
    }

    #[test]
    fn test_rejects_invalid_values() {
        for doc in [
            "[security]\niterations = 0",
            "[security]\nsecurity_seed = \"\"",
            "[security]\nsalt_length = 8",
            "[security]\ncipher_steps = 4",
            "[archive]\ncompression_level = 40",
            "[archive]\nsegment_size = 0",
        ] {
            let result = GordianConfig::from_toml_str(doc);
            assert!(
                matches!(result, Err(GordianError::Config(_))),
                "expected config error for {doc:?}"
            );
        }
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GordianConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.security.iterations, 2048);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gordian.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

        let config = GordianConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = GordianConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = GordianConfig::from_toml_str(&toml_str).unwrap();

        assert_eq!(config.security.iterations, parsed.security.iterations);
        assert_eq!(config.archive.default_mode, parsed.archive.default_mode);
    }
}
