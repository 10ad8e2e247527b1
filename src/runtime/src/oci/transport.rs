//! Registry transport seam.
//!
//! Everything above this layer talks to registries through
//! [`RegistryTransport`], so the copy and version logic runs unchanged
//! against a real registry or the in-memory one.

use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::Result;

use super::manifest::RawManifest;
use super::reference::ImageReference;

/// Authentication credentials for a container registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Basic auth when both halves are present, anonymous otherwise.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Self {
        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Read/write primitives of one authenticated registry connection.
///
/// Transports report a missing manifest, blob or repository as
/// `CranError::NotFound`; any other failure is a `RegistryError`.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch a manifest by tag or digest, exactly as stored.
    async fn pull_manifest(&self, reference: &ImageReference) -> Result<RawManifest>;

    /// Store a manifest under the reference's tag (or digest).
    async fn push_manifest(&self, reference: &ImageReference, manifest: &RawManifest)
        -> Result<()>;

    /// Fetch a blob from the reference's repository.
    async fn pull_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>>;

    /// Upload a blob into the reference's repository.
    async fn push_blob(&self, reference: &ImageReference, digest: &str, data: Vec<u8>)
        -> Result<()>;

    /// All tags of the reference's repository.
    async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>>;
}

/// Opens transports, one per set of credentials.
pub trait RegistryConnector: Send + Sync {
    fn connect(&self, auth: &RegistryAuth) -> Result<Arc<dyn RegistryTransport>>;
}
