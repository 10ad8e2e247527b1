//! Manifest and index documents.
//!
//! Manifests move between registries as raw bytes so their digests can be
//! recomputed locally; the serde types here are only used to inspect them
//! and to build new manifest lists.

use std::collections::BTreeMap;

use cranberry_core::digest::sha256_digest;
use cranberry_core::error::{CranError, Result};
use serde::{Deserialize, Serialize};

use super::reference::ImageReference;

/// OCI image manifest media type.
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index media type.
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker schema 2 manifest media type.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list media type.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media types accepted when pulling manifests.
pub const ACCEPTED_MEDIA_TYPES: [&str; 4] = [
    OCI_IMAGE_MANIFEST,
    OCI_IMAGE_INDEX,
    DOCKER_MANIFEST,
    DOCKER_MANIFEST_LIST,
];

/// Whether a media type denotes a multi-platform index.
pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_IMAGE_INDEX || media_type == DOCKER_MANIFEST_LIST
}

/// Content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
}

/// Platform entry of an index descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl PlatformSpec {
    /// `os/architecture` key, as used for platform lookups.
    pub fn key(&self) -> String {
        format!("{}/{}", self.os, self.architecture)
    }
}

/// Single-platform image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Config and layer digests, in that order.
    pub fn blob_digests(&self) -> Vec<&str> {
        std::iter::once(self.config.digest.as_str())
            .chain(self.layers.iter().map(|l| l.digest.as_str()))
            .collect()
    }
}

/// Multi-platform image index (OCI index or Docker manifest list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Platform key → manifest digest. Entries without a platform are omitted.
    pub fn platform_digests(&self) -> BTreeMap<String, String> {
        self.manifests
            .iter()
            .filter_map(|m| m.platform.as_ref().map(|p| (p.key(), m.digest.clone())))
            .collect()
    }
}

/// A manifest exactly as stored in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl RawManifest {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Wrap bytes whose media type the registry did not report.
    pub fn sniff(bytes: Vec<u8>) -> Result<Self> {
        let media_type = detect_media_type(&bytes)?;
        Ok(Self { media_type, bytes })
    }

    /// Digest computed locally from the manifest bytes.
    pub fn digest(&self) -> String {
        sha256_digest(&self.bytes)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_index(&self) -> bool {
        is_index(&self.media_type)
    }

    pub fn parse_image(&self) -> Result<ImageManifest> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    pub fn parse_index(&self) -> Result<ImageIndex> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    /// Descriptor pointing at this manifest.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.digest(),
            size: self.size(),
            platform: None,
        }
    }
}

/// Determine a manifest's media type from its JSON body.
///
/// Uses the `mediaType` field when present; otherwise a document with a
/// `manifests` array is an OCI index and anything else an OCI manifest.
pub fn detect_media_type(bytes: &[u8]) -> Result<String> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MediaTypeHint {
        media_type: Option<String>,
        manifests: Option<serde_json::Value>,
    }

    let hint: MediaTypeHint = serde_json::from_slice(bytes)
        .map_err(|e| CranError::SerializationError(format!("Malformed manifest: {}", e)))?;
    Ok(match (hint.media_type, hint.manifests) {
        (Some(media_type), _) => media_type,
        (None, Some(_)) => OCI_IMAGE_INDEX.to_string(),
        (None, None) => OCI_IMAGE_MANIFEST.to_string(),
    })
}

/// A manifest fetched from a concrete registry reference.
///
/// Its digest is always derived from the fetched bytes.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub reference: ImageReference,
    pub manifest: RawManifest,
}

impl ImageHandle {
    pub fn digest(&self) -> String {
        self.manifest.digest()
    }

    pub fn media_type(&self) -> &str {
        &self.manifest.media_type
    }

    pub fn size(&self) -> u64 {
        self.manifest.size()
    }
}
