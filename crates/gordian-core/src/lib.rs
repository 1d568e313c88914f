//! gordian-core: error taxonomy and configuration schema shared by the
//! crypto, archive and CLI crates.

pub mod config;
pub mod error;

pub use config::{ArchiveConfig, GordianConfig, LoggingConfig, SecurityConfig};
pub use error::{GordianError, GordianResult};
