//! OCI registry access.
//!
//! ```text
//! RegistryClient ──► RegistryTransport ──► OciTransport (oci-distribution)
//!                                     └──► MemoryTransport (MemoryRegistry)
//! ```
//!
//! Manifests are carried as raw bytes end to end; digests are recomputed
//! locally from those bytes.

pub mod client;
pub mod distribution;
pub mod manifest;
pub mod memory;
pub mod reference;
pub mod transport;

pub use client::RegistryClient;
pub use distribution::{OciConnector, OciTransport};
pub use manifest::{Descriptor, ImageHandle, ImageIndex, ImageManifest, PlatformSpec, RawManifest};
pub use memory::MemoryRegistry;
pub use reference::ImageReference;
pub use transport::{RegistryAuth, RegistryConnector, RegistryTransport};
