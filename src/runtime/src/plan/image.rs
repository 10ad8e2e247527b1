//! Image handles shared between plan resources.

use std::sync::Arc;

use cranberry_core::digest::is_valid_digest;
use cranberry_core::error::{CranError, Result};
use parking_lot::RwLock;

use crate::oci::ImageReference;

/// A container image: repository name, optional tag and optional digest.
///
/// The digest is either pinned when the image is built, or resolved later
/// by the sync that has this image as its destination. Consumers read it
/// with [`Image::digest_ref`], which fails until one of the two is known.
pub struct Image {
    name: String,
    version: Option<String>,
    pinned: Option<String>,
    resolved: RwLock<Option<String>>,
    producer: RwLock<Option<String>>,
}

impl Image {
    pub fn builder(name: impl Into<String>) -> ImageBuilder {
        ImageBuilder {
            name: name.into(),
            version: None,
            digest: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The pinned digest, or the one resolved by a sync.
    pub fn digest(&self) -> Option<String> {
        self.pinned
            .clone()
            .or_else(|| self.resolved.read().clone())
    }

    /// Name of the sync that will resolve this image's digest.
    pub fn producer(&self) -> Option<String> {
        self.producer.read().clone()
    }

    /// `name:version`.
    pub fn tag_ref(&self) -> Result<ImageReference> {
        let version = self.version.as_deref().ok_or_else(|| CranError::InvalidReference {
            reference: self.name.clone(),
            message: "a tag reference requires a version".to_string(),
        })?;
        ImageReference::parse(&format!("{}:{}", self.name, version))
    }

    /// `name:version`, or the repository's default tag without a version.
    pub fn push_ref(&self) -> Result<ImageReference> {
        match self.version {
            Some(_) => self.tag_ref(),
            None => ImageReference::parse(&self.name),
        }
    }

    /// `name@digest` for an operation that must not trust a mutable tag.
    pub fn digest_ref(&self, operation: &'static str) -> Result<ImageReference> {
        let digest = self.digest().ok_or_else(|| CranError::MissingDigest {
            operation,
            image: self.name.clone(),
            pending_on: self.producer(),
        })?;
        ImageReference::parse(&format!("{}@{}", self.name, digest))
    }

    /// The digest reference when a digest is known, otherwise the tag.
    pub fn best_ref(&self) -> Result<ImageReference> {
        match self.digest() {
            Some(_) => self.digest_ref("audit"),
            None => self.tag_ref(),
        }
    }

    /// Record `sync` as the only resource allowed to resolve the digest.
    pub(crate) fn claim(&self, sync: &str) -> std::result::Result<(), String> {
        let mut producer = self.producer.write();
        match producer.as_deref() {
            Some(existing) => Err(existing.to_string()),
            None => {
                *producer = Some(sync.to_string());
                Ok(())
            }
        }
    }

    pub(crate) fn resolve(&self, digest: String) {
        *self.resolved.write() = Some(digest);
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("digest", &self.digest())
            .finish()
    }
}

/// Builder for [`Image`].
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    name: String,
    version: Option<String>,
    digest: Option<String>,
}

impl ImageBuilder {
    /// Tag, possibly with a variant suffix (`0.50.0-distroless-static`).
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn build(self) -> Result<Arc<Image>> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("image name is required".to_string());
        } else if self.name.contains(['@', ' '])
            || self.name.rsplit('/').next().is_some_and(|last| last.contains(':'))
        {
            problems.push("image name must not contain a tag, digest or spaces".to_string());
        } else if let Err(e) = ImageReference::parse(&self.name) {
            problems.push(e.to_string());
        }
        if matches!(self.version.as_deref(), Some(v) if v.is_empty()) {
            problems.push("version must not be empty".to_string());
        }
        if let Some(digest) = &self.digest {
            if !is_valid_digest(digest) {
                problems.push(format!("'{}' is not a valid digest", digest));
            }
        }
        if !problems.is_empty() {
            return Err(CranError::Validation {
                kind: "image",
                name: self.name,
                problems,
            });
        }

        Ok(Arc::new(Image {
            name: self.name,
            version: self.version,
            pinned: self.digest,
            resolved: RwLock::new(None),
            producer: RwLock::new(None),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn test_references() {
        let image = Image::builder("timberio/vector")
            .version("0.50.0-distroless-static")
            .digest(DIGEST)
            .build()
            .unwrap();
        assert_eq!(
            image.tag_ref().unwrap().to_string(),
            "docker.io/timberio/vector:0.50.0-distroless-static"
        );
        assert_eq!(
            image.digest_ref("scan").unwrap().to_string(),
            format!("docker.io/timberio/vector@{}", DIGEST)
        );
        assert_eq!(image.best_ref().unwrap(), image.digest_ref("audit").unwrap());
    }

    #[test]
    fn test_tag_ref_requires_version() {
        let image = Image::builder("caddy").build().unwrap();
        assert!(matches!(image.tag_ref(), Err(CranError::InvalidReference { .. })));
        assert_eq!(image.push_ref().unwrap().to_string(), "docker.io/library/caddy:latest");
    }

    #[test]
    fn test_digest_ref_names_pending_producer() {
        let image = Image::builder("ghcr.io/org/vector").version("v1").build().unwrap();
        image.claim("vector-sync").unwrap();
        let err = image.digest_ref("scan").unwrap_err();
        assert!(matches!(
            err,
            CranError::MissingDigest { pending_on: Some(ref s), .. } if s == "vector-sync"
        ));

        image.resolve(DIGEST.to_string());
        assert_eq!(image.digest().as_deref(), Some(DIGEST));
        assert!(image.digest_ref("scan").is_ok());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let image = Image::builder("ghcr.io/org/vector").build().unwrap();
        image.claim("first").unwrap();
        assert_eq!(image.claim("second").unwrap_err(), "first");
        assert_eq!(image.producer().as_deref(), Some("first"));
    }

    #[test]
    fn test_builder_collects_problems() {
        let err = Image::builder("")
            .version("")
            .digest("sha256:nothex")
            .build()
            .unwrap_err();
        match err {
            CranError::Validation { kind, problems, .. } => {
                assert_eq!(kind, "image");
                assert_eq!(problems.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_name_with_tag_is_rejected() {
        assert!(Image::builder("caddy@sha256:abc").build().is_err());
    }
}
