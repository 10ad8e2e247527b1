//! Cranberry Runtime - plan execution for container images.
//!
//! Provides the registry client and its transports, the multi-platform
//! sync engine, the version checker, the external tool collaborators and
//! the [`Plan`] that ties them into a fixed five-stage pipeline.

#![allow(clippy::result_large_err)]

pub mod oci;
pub mod plan;
pub mod sync;
pub mod tools;
pub mod version;

// Re-export common types
pub use oci::{ImageReference, MemoryRegistry, OciConnector, RegistryAuth, RegistryClient};
pub use oci::{RegistryConnector, RegistryTransport};
pub use plan::manifest::load_plan;
pub use plan::{ExecutionContext, Image, Plan, PlannedAction, Registry, StageKind};
pub use sync::Syncer;
pub use version::{compare_versions, extract_variant, VersionChecker, VersionFilter, VersionInfo};

/// Cranberry Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
