//! Cranberry Core - Foundational Types
//!
//! Errors, settings, logging setup, platforms and digest helpers shared by
//! the runtime and the command line front end.

pub mod config;
pub mod digest;
pub mod error;
pub mod log;
pub mod platform;

// Re-export commonly used types
pub use config::{LogConfig, LogFormat, RegistrySettings, Settings, ToolsConfig};
pub use digest::{is_valid_digest, sha256_digest};
pub use error::{CranError, Result};
pub use platform::Platform;

/// Cranberry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
