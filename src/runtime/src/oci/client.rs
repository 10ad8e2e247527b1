//! Registry client: descriptor and digest lookups, copies between
//! registries, and manifest list construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;

use super::manifest::{
    Descriptor, ImageHandle, ImageIndex, PlatformSpec, RawManifest, DOCKER_MANIFEST_LIST,
};
use super::reference::ImageReference;
use super::transport::{RegistryAuth, RegistryConnector, RegistryTransport};

/// Registry operations over one authenticated transport.
///
/// Every digest this client reports is computed from manifest bytes it
/// actually fetched or built, never taken from a registry response header.
#[derive(Clone)]
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    side: &'static str,
}

impl RegistryClient {
    pub fn new(transport: Arc<dyn RegistryTransport>, side: &'static str) -> Self {
        Self { transport, side }
    }

    /// Open a client with its own credentials.
    pub fn connect(
        connector: &dyn RegistryConnector,
        auth: &RegistryAuth,
        side: &'static str,
    ) -> Result<Self> {
        Ok(Self::new(connector.connect(auth)?, side))
    }

    pub fn side(&self) -> &'static str {
        self.side
    }

    /// Descriptor of the manifest at `reference`.
    pub async fn get_descriptor(&self, reference: &ImageReference) -> Result<Descriptor> {
        let manifest = self.pull_manifest(reference).await?;
        tracing::debug!(
            side = self.side,
            reference = %reference,
            media_type = %manifest.media_type,
            "Fetched descriptor"
        );
        Ok(manifest.descriptor())
    }

    pub async fn get_digest(&self, reference: &ImageReference) -> Result<String> {
        Ok(self.get_descriptor(reference).await?.digest)
    }

    /// Platform key → digest of every platform-specific manifest in an index.
    pub async fn get_platform_digests(
        &self,
        reference: &ImageReference,
    ) -> Result<BTreeMap<String, String>> {
        let manifest = self.pull_manifest(reference).await?;
        if !manifest.is_index() {
            return Err(CranError::RegistryError {
                registry: reference.registry.clone(),
                message: format!(
                    "{} is not an image index ({})",
                    reference, manifest.media_type
                ),
            });
        }
        Ok(manifest.parse_index()?.platform_digests())
    }

    /// Fetch the manifest at `reference` as a handle.
    pub async fn fetch_image(&self, reference: &ImageReference) -> Result<ImageHandle> {
        let manifest = self.pull_manifest(reference).await?;
        Ok(ImageHandle {
            reference: reference.clone(),
            manifest,
        })
    }

    /// Copy an image (or a whole index) from `src` on this registry to `dst`.
    pub async fn copy_image(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        dst_client: &RegistryClient,
    ) -> Result<()> {
        let manifest = self.pull_manifest(src).await?;
        if manifest.is_index() {
            return self.copy_index_manifest(src, dst, dst_client, &manifest).await;
        }
        self.copy_blobs(src, dst, dst_client, &manifest).await?;
        dst_client.transport.push_manifest(dst, &manifest).await?;
        tracing::debug!(side = self.side, source = %src, destination = %dst, "Copied image");
        Ok(())
    }

    /// Copy an index and every manifest it references.
    pub async fn copy_index(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        dst_client: &RegistryClient,
    ) -> Result<()> {
        let manifest = self.pull_manifest(src).await?;
        if !manifest.is_index() {
            return Err(CranError::RegistryError {
                registry: src.registry.clone(),
                message: format!("{} is not an image index ({})", src, manifest.media_type),
            });
        }
        self.copy_index_manifest(src, dst, dst_client, &manifest).await
    }

    /// Copy one platform's image, addressed by its content digest in the
    /// source repository, to `dst`.
    pub async fn copy_platform_image(
        &self,
        src: &ImageReference,
        platform_digest: &str,
        dst: &ImageReference,
        dst_client: &RegistryClient,
    ) -> Result<()> {
        let by_digest = src.with_digest(platform_digest);
        tracing::debug!(
            side = self.side,
            source = %by_digest,
            destination = %dst,
            "Copying platform image"
        );
        self.copy_image(&by_digest, dst, dst_client).await
    }

    /// Build a manifest list over `images`, push it to `reference` and
    /// return its digest.
    ///
    /// Entries are ordered by platform key before serialization, so the same
    /// set of images yields the same digest whatever order it arrives in.
    pub async fn push_manifest_list(
        &self,
        reference: &ImageReference,
        images: &[(Platform, ImageHandle)],
    ) -> Result<String> {
        let sorted: BTreeMap<&str, (Platform, &ImageHandle)> = images
            .iter()
            .map(|(platform, handle)| (platform.as_str(), (*platform, handle)))
            .collect();

        let mut manifests = Vec::with_capacity(sorted.len());
        for (key, (platform, handle)) in &sorted {
            tracing::debug!(side = self.side, platform = %key, "Adding platform to manifest list");
            manifests.push(Descriptor {
                platform: Some(PlatformSpec {
                    architecture: platform.architecture().to_string(),
                    os: platform.os().to_string(),
                    variant: None,
                }),
                ..handle.manifest.descriptor()
            });
        }

        let index = ImageIndex {
            schema_version: 2,
            media_type: Some(DOCKER_MANIFEST_LIST.to_string()),
            manifests,
        };
        let list = RawManifest::new(DOCKER_MANIFEST_LIST, serde_json::to_vec(&index)?);
        self.transport.push_manifest(reference, &list).await?;

        let digest = list.digest();
        tracing::debug!(
            side = self.side,
            reference = %reference,
            platforms = sorted.len(),
            digest = %digest,
            "Pushed manifest list"
        );
        Ok(digest)
    }

    /// Whether `reference` exists. Only a not-found answer yields `Ok(false)`.
    pub async fn check_exists(&self, reference: &ImageReference) -> Result<bool> {
        match self.pull_manifest(reference).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        self.transport.list_tags(reference).await
    }

    /// Pull a manifest, rejecting content that does not hash to the digest
    /// the reference pins.
    async fn pull_manifest(&self, reference: &ImageReference) -> Result<RawManifest> {
        let manifest = self.transport.pull_manifest(reference).await?;
        if let Some(expected) = &reference.digest {
            let actual = manifest.digest();
            if actual != *expected {
                return Err(CranError::DigestMismatch {
                    reference: reference.full_reference(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(manifest)
    }

    async fn copy_index_manifest(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        dst_client: &RegistryClient,
        index: &RawManifest,
    ) -> Result<()> {
        for child in index.parse_index()?.manifests {
            let child_src = src.with_digest(&child.digest);
            let child_dst = dst.with_digest(&child.digest);
            let manifest = self.pull_manifest(&child_src).await?;
            self.copy_blobs(&child_src, &child_dst, dst_client, &manifest)
                .await?;
            dst_client
                .transport
                .push_manifest(&child_dst, &manifest)
                .await?;
        }
        dst_client.transport.push_manifest(dst, index).await?;
        tracing::debug!(side = self.side, source = %src, destination = %dst, "Copied index");
        Ok(())
    }

    async fn copy_blobs(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
        dst_client: &RegistryClient,
        manifest: &RawManifest,
    ) -> Result<()> {
        let image = manifest.parse_image()?;
        for digest in image.blob_digests() {
            let data = self.transport.pull_blob(src, digest).await?;
            tracing::trace!(digest = %digest, size = data.len(), "Copying blob");
            dst_client.transport.push_blob(dst, digest, data).await?;
        }
        Ok(())
    }
}
