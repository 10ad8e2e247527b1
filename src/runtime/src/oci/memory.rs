//! In-memory registry.
//!
//! Holds manifests, tags and blobs per repository and validates pushes the
//! way a distribution registry does: an image manifest is only accepted
//! once its blobs exist, an index only once its child manifests exist.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::digest::sha256_digest;
use cranberry_core::error::{CranError, Result};
use parking_lot::Mutex;

use super::manifest::{
    Descriptor, ImageIndex, ImageManifest, PlatformSpec, RawManifest, OCI_IMAGE_INDEX,
    OCI_IMAGE_MANIFEST,
};
use super::reference::ImageReference;
use super::transport::{RegistryAuth, RegistryConnector, RegistryTransport};

const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

#[derive(Default)]
struct Repository {
    tags: BTreeMap<String, String>,
    manifests: HashMap<String, RawManifest>,
    blobs: HashMap<String, Vec<u8>>,
}

impl Repository {
    fn resolve(&self, reference: &ImageReference) -> Option<&RawManifest> {
        let digest = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest,
            (None, Some(tag)) => self.tags.get(tag)?,
            (None, None) => return None,
        };
        self.manifests.get(digest)
    }

    fn store(&mut self, tag: Option<&str>, manifest: RawManifest) -> String {
        let digest = manifest.digest();
        if let Some(tag) = tag {
            self.tags.insert(tag.to_string(), digest.clone());
        }
        self.manifests.insert(digest.clone(), manifest);
        digest
    }

    /// First digest a manifest refers to that this repository lacks.
    fn missing_content(&self, manifest: &RawManifest) -> Result<Option<String>> {
        if manifest.is_index() {
            let index = manifest.parse_index()?;
            let missing = index
                .manifests
                .iter()
                .find(|m| !self.manifests.contains_key(&m.digest))
                .map(|m| m.digest.clone());
            return Ok(missing);
        }
        let image = manifest.parse_image()?;
        let digests = image.blob_digests();
        let missing = digests
            .iter()
            .find(|d| !self.blobs.contains_key(**d))
            .map(|d| d.to_string());
        Ok(missing)
    }
}

#[derive(Default)]
struct State {
    repositories: HashMap<String, Repository>,
    unavailable: HashSet<String>,
    credentials: HashMap<String, RegistryAuth>,
    pushed: Vec<String>,
}

/// A registry living in process memory, shared by every transport it opens.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a manifest as-is under the reference's tag, bypassing validation.
    pub fn insert_manifest(&self, reference: &str, manifest: RawManifest) -> Result<String> {
        let reference = ImageReference::parse(reference)?;
        let mut state = self.state.lock();
        let repo = state
            .repositories
            .entry(reference.repository_reference())
            .or_default();
        Ok(repo.store(reference.tag.as_deref(), manifest))
    }

    /// Seed a single-platform image whose config and layer are derived from
    /// `seed`. Returns the manifest digest.
    pub fn insert_image(&self, reference: &str, seed: &str) -> Result<String> {
        let parsed = ImageReference::parse(reference)?;
        let config = format!(r#"{{"architecture":"{}","os":"linux"}}"#, seed).into_bytes();
        let layer = format!("layer-{}", seed).into_bytes();
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MANIFEST.to_string()),
            config: Descriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                digest: sha256_digest(&config),
                size: config.len() as u64,
                platform: None,
            },
            layers: vec![Descriptor {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                digest: sha256_digest(&layer),
                size: layer.len() as u64,
                platform: None,
            }],
        };
        {
            let mut state = self.state.lock();
            let repo = state
                .repositories
                .entry(parsed.repository_reference())
                .or_default();
            repo.blobs.insert(sha256_digest(&config), config);
            repo.blobs.insert(sha256_digest(&layer), layer);
        }
        let bytes = serde_json::to_vec(&manifest)?;
        self.insert_manifest(reference, RawManifest::new(OCI_IMAGE_MANIFEST, bytes))
    }

    /// Seed an index over manifests already stored in the same repository.
    /// `platforms` pairs an `os/arch` key with a manifest digest.
    pub fn insert_index(&self, reference: &str, platforms: &[(&str, &str)]) -> Result<String> {
        let parsed = ImageReference::parse(reference)?;
        let mut manifests = Vec::with_capacity(platforms.len());
        {
            let state = self.state.lock();
            let repo = state
                .repositories
                .get(&parsed.repository_reference())
                .ok_or_else(|| CranError::NotFound(parsed.repository_reference()))?;
            for (platform, digest) in platforms {
                let child = repo.manifests.get(*digest).ok_or_else(|| {
                    CranError::NotFound(format!("{}@{}", parsed.repository_reference(), digest))
                })?;
                let (os, architecture) = platform.split_once('/').ok_or_else(|| {
                    CranError::ConfigError(format!("Invalid platform key '{}'", platform))
                })?;
                manifests.push(Descriptor {
                    media_type: child.media_type.clone(),
                    digest: digest.to_string(),
                    size: child.size(),
                    platform: Some(PlatformSpec {
                        architecture: architecture.to_string(),
                        os: os.to_string(),
                        variant: None,
                    }),
                });
            }
        }
        let index = ImageIndex {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_INDEX.to_string()),
            manifests,
        };
        let bytes = serde_json::to_vec(&index)?;
        self.insert_manifest(reference, RawManifest::new(OCI_IMAGE_INDEX, bytes))
    }

    /// Make every operation on a repository fail with a transport error.
    pub fn set_unavailable(&self, repository: &str) -> Result<()> {
        let parsed = ImageReference::parse(repository)?;
        self.state
            .lock()
            .unavailable
            .insert(parsed.repository_reference());
        Ok(())
    }

    /// Reject connections to `host` that do not present these credentials.
    pub fn require_credentials(&self, host: &str, auth: RegistryAuth) {
        self.state.lock().credentials.insert(host.to_string(), auth);
    }

    /// Manifest currently stored at a tag or digest reference.
    pub fn manifest(&self, reference: &str) -> Option<RawManifest> {
        let parsed = ImageReference::parse(reference).ok()?;
        let state = self.state.lock();
        state
            .repositories
            .get(&parsed.repository_reference())?
            .resolve(&parsed)
            .cloned()
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.manifest(reference).is_some()
    }

    /// References of every manifest pushed through a transport, in order.
    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().pushed.clone()
    }
}

impl RegistryConnector for MemoryRegistry {
    fn connect(&self, auth: &RegistryAuth) -> Result<Arc<dyn RegistryTransport>> {
        Ok(Arc::new(MemoryTransport {
            registry: self.clone(),
            auth: auth.clone(),
        }))
    }
}

/// A connection to a [`MemoryRegistry`] with its own credentials.
pub struct MemoryTransport {
    registry: MemoryRegistry,
    auth: RegistryAuth,
}

impl MemoryTransport {
    fn check_access(&self, state: &State, reference: &ImageReference) -> Result<()> {
        if let Some(required) = state.credentials.get(&reference.registry) {
            if *required != self.auth {
                return Err(CranError::RegistryError {
                    registry: reference.registry.clone(),
                    message: "unauthorized: authentication required".to_string(),
                });
            }
        }
        if state.unavailable.contains(&reference.repository_reference()) {
            return Err(CranError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("{} is unavailable", reference.repository_reference()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryTransport for MemoryTransport {
    async fn pull_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let state = self.registry.state.lock();
        self.check_access(&state, reference)?;
        state
            .repositories
            .get(&reference.repository_reference())
            .and_then(|repo| repo.resolve(reference))
            .cloned()
            .ok_or_else(|| CranError::NotFound(reference.full_reference()))
    }

    async fn push_manifest(
        &self,
        reference: &ImageReference,
        manifest: &RawManifest,
    ) -> Result<()> {
        let mut state = self.registry.state.lock();
        self.check_access(&state, reference)?;

        let missing = match state.repositories.get(&reference.repository_reference()) {
            Some(repo) => repo.missing_content(manifest)?,
            None => Repository::default().missing_content(manifest)?,
        };
        if let Some(digest) = missing {
            return Err(CranError::RegistryError {
                registry: reference.registry.clone(),
                message: format!(
                    "manifest for {} references unknown content {}",
                    reference, digest
                ),
            });
        }

        if let Some(expected) = &reference.digest {
            if *expected != manifest.digest() {
                return Err(CranError::RegistryError {
                    registry: reference.registry.clone(),
                    message: format!("manifest digest does not match {}", expected),
                });
            }
        }

        state
            .repositories
            .entry(reference.repository_reference())
            .or_default()
            .store(reference.tag.as_deref(), manifest.clone());
        state.pushed.push(reference.full_reference());
        Ok(())
    }

    async fn pull_blob(&self, reference: &ImageReference, digest: &str) -> Result<Vec<u8>> {
        let state = self.registry.state.lock();
        self.check_access(&state, reference)?;
        state
            .repositories
            .get(&reference.repository_reference())
            .and_then(|repo| repo.blobs.get(digest))
            .cloned()
            .ok_or_else(|| {
                CranError::NotFound(format!("{}@{}", reference.repository_reference(), digest))
            })
    }

    async fn push_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.registry.state.lock();
        self.check_access(&state, reference)?;
        if sha256_digest(&data) != digest {
            return Err(CranError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("blob content does not match {}", digest),
            });
        }
        state
            .repositories
            .entry(reference.repository_reference())
            .or_default()
            .blobs
            .insert(digest.to_string(), data);
        Ok(())
    }

    async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        let state = self.registry.state.lock();
        self.check_access(&state, reference)?;
        state
            .repositories
            .get(&reference.repository_reference())
            .map(|repo| repo.tags.keys().cloned().collect())
            .ok_or_else(|| CranError::NotFound(reference.repository_reference()))
    }
}
