//! OCI image reference parsing.
//!
//! Parses references like `ghcr.io/org/vector:0.50.0` or
//! `timberio/vector@sha256:...` into structured components.

use cranberry_core::error::{CranError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "timberio/vector")
    pub repository: String,
    /// Tag (e.g., "latest", "0.50.0-distroless-static")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `timberio/vector` → docker.io/timberio/vector:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    /// - `localhost:5000/image` → localhost:5000/image:latest
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid(
                        reference,
                        "invalid digest format, expected algorithm:hex",
                    ));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag colon can only appear after the last slash; a colon before
        // any slash is a registry port.
        let last_segment_start = name_tag.rfind('/').map(|pos| pos + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                let candidate = &name_tag[colon + 1..];
                // "host:5000" without a slash is a bare registry, not name:tag
                if last_segment_start == 0
                    && !candidate.is_empty()
                    && candidate.chars().all(|c| c.is_ascii_digit())
                {
                    (name_tag, None)
                } else {
                    (&name_tag[..colon], Some(candidate.to_string()))
                }
            }
            None => (name_tag, None),
        };

        if let Some(ref t) = tag {
            if t.is_empty() {
                return Err(invalid(reference, "empty tag"));
            }
        }

        let (registry, repository) = Self::split_registry_repository(reference, name)?;

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
        if name.is_empty() {
            return Err(invalid(reference, "empty repository"));
        }

        // The first component is a registry when it looks like a hostname
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(invalid(reference, "empty repository"));
                }
                return Ok((first.to_string(), rest.to_string()));
            }
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            // Single name like "nginx" → "library/nginx" for Docker Hub
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// The repository without tag or digest (`registry/repository`).
    pub fn repository_reference(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same repository, addressed by tag only.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Same repository, addressed by digest only.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Tag reference with `-<suffix>` appended to the tag (`name:v1` → `name:v1-amd64`).
    pub fn suffixed(&self, suffix: &str) -> Self {
        let tag = self.tag.as_deref().unwrap_or(DEFAULT_TAG);
        self.with_tag(format!("{}-{}", tag, suffix))
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_reference();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = CranError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(reference: &str, message: &str) -> CranError {
    CranError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("timberio/vector:0.50.0-distroless-static").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "timberio/vector");
        assert_eq!(r.tag, Some("0.50.0-distroless-static".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/org/vector:v0.1.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/vector");
        assert_eq!(r.tag, Some("v0.1.0".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("ghcr.io/org/vector@{}", DIGEST)).unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/vector");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some(DIGEST.to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/org/vector:v1@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/mirror/vector:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "mirror/vector");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port_no_tag() {
        let r = ImageReference::parse("registry.local:5000/vector").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "vector");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ImageReference::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.repository, "org/sub/image");
    }

    #[test]
    fn test_parse_errors() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
    }

    #[test]
    fn test_repository_reference_strips_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/org/vector:v1@sha256:abcdef").unwrap();
        assert_eq!(r.repository_reference(), "ghcr.io/org/vector");
    }

    #[test]
    fn test_with_digest_drops_tag() {
        let r = ImageReference::parse("ghcr.io/org/vector:v1").unwrap();
        assert_eq!(
            r.with_digest(DIGEST).full_reference(),
            format!("ghcr.io/org/vector@{}", DIGEST)
        );
    }

    #[test]
    fn test_suffixed() {
        let r = ImageReference::parse("ghcr.io/org/vector:v1").unwrap();
        assert_eq!(r.suffixed("amd64").full_reference(), "ghcr.io/org/vector:v1-amd64");
    }

    #[test]
    fn test_display_roundtrip() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/nginx:1.25");
        let again: ImageReference = r.to_string().parse().unwrap();
        assert_eq!(again, r);
    }
}
