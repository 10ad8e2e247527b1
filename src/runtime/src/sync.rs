//! Image synchronisation between registries.
//!
//! Single-platform images are copied verbatim. Indexes are rebuilt: each
//! retained platform image is copied by digest to a `<tag>-<arch>` tag and a
//! fresh manifest list is pushed at the destination tag.

use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;

use crate::oci::{ImageReference, RegistryClient};

/// Copies images from a source registry client to a destination one.
pub struct Syncer {
    source: RegistryClient,
    destination: RegistryClient,
    platforms: Vec<Platform>,
}

impl Syncer {
    /// Create a syncer that retains every supported platform.
    pub fn new(source: RegistryClient, destination: RegistryClient) -> Self {
        Self {
            source,
            destination,
            platforms: Platform::SUPPORTED.to_vec(),
        }
    }

    /// Restrict the platforms copied out of multi-platform sources.
    pub fn with_platforms(mut self, platforms: &[Platform]) -> Self {
        self.platforms = platforms.to_vec();
        self
    }

    /// Copy `src` to `dst` and return the destination digest, computed from
    /// the manifest actually stored at the destination.
    pub async fn sync_image(&self, src: &ImageReference, dst: &ImageReference) -> Result<String> {
        tracing::debug!(source = %src, destination = %dst, "Starting image sync");

        let descriptor = self.source.get_descriptor(src).await?;
        if crate::oci::manifest::is_index(&descriptor.media_type) {
            tracing::debug!("Detected multi-platform image index");
            self.sync_multi_platform(src, dst).await
        } else {
            tracing::debug!("Detected single-platform image");
            self.sync_single_platform(src, dst).await
        }
    }

    async fn sync_single_platform(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<String> {
        self.source.copy_image(src, dst, &self.destination).await?;
        let pushed = self.destination.fetch_image(dst).await?;
        let digest = pushed.digest();
        tracing::debug!(digest = %digest, "Single-platform image synced");
        Ok(digest)
    }

    async fn sync_multi_platform(
        &self,
        src: &ImageReference,
        dst: &ImageReference,
    ) -> Result<String> {
        let platform_digests = self.source.get_platform_digests(src).await?;
        tracing::debug!(platforms = platform_digests.len(), "Found platforms in source image");

        let mut retained = Vec::new();
        for (key, digest) in &platform_digests {
            match Platform::from_key(key) {
                Some(platform) if self.platforms.contains(&platform) => {
                    retained.push((platform, digest.as_str()))
                }
                _ => tracing::debug!(platform = %key, "Skipping unsupported platform"),
            }
        }

        if retained.is_empty() {
            return Err(CranError::NoSupportedPlatforms {
                reference: src.full_reference(),
                found: platform_digests.keys().cloned().collect(),
            });
        }

        let mut images = Vec::with_capacity(retained.len());
        for (platform, digest) in retained {
            let platform_dst = dst.suffixed(platform.architecture());
            tracing::debug!(
                platform = %platform,
                digest = %digest,
                destination = %platform_dst,
                "Copying platform image"
            );
            self.source
                .copy_platform_image(src, digest, &platform_dst, &self.destination)
                .await?;
            let pushed = self.destination.fetch_image(&platform_dst).await?;
            images.push((platform, pushed));
        }

        tracing::debug!(destination = %dst, "Creating manifest list");
        let digest = self.destination.push_manifest_list(dst, &images).await?;
        tracing::debug!(digest = %digest, "Manifest list created");
        Ok(digest)
    }

    /// Whether `reference` exists at the destination.
    pub async fn check_exists(&self, reference: &ImageReference) -> Result<bool> {
        self.destination.check_exists(reference).await
    }
}
