//! Sync resources: digest-addressed copies between registries.

use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;

use super::context::ExecutionContext;
use super::image::Image;
use super::registry::{auth_for, Registry};
use super::stage::{Resource, StageKind};
use super::Plan;
use crate::oci::RegistryClient;
use crate::sync::Syncer;

/// Copies a digest-pinned source image to a destination tag.
///
/// On success the destination [`Image`] carries the digest computed from
/// the content actually pushed, so later scans can address it by digest.
pub struct ImageSync {
    name: String,
    source: Arc<Image>,
    source_registry: Option<Arc<Registry>>,
    verified_by: Option<String>,
    destination: Arc<Image>,
    destination_registry: Arc<Registry>,
    platforms: Vec<Platform>,
    span: tracing::Span,
}

impl ImageSync {
    pub fn source(&self) -> &Arc<Image> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<Image> {
        &self.destination
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// Destination digest once the sync has run.
    pub fn destination_digest(&self) -> Option<String> {
        self.destination.digest()
    }
}

#[async_trait]
impl Resource for ImageSync {
    fn kind(&self) -> &'static str {
        "sync"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn describe(&self) -> String {
        let platforms: Vec<_> = self.platforms.iter().map(Platform::as_str).collect();
        let mut summary = format!(
            "copy {}@{} to {}:{} [{}]",
            self.source.name(),
            self.source.digest().unwrap_or_default(),
            self.destination.name(),
            self.destination.version().unwrap_or("latest"),
            platforms.join(", ")
        );
        if let Some(scan) = &self.verified_by {
            summary.push_str(&format!(", vetted by scan '{}'", scan));
        }
        summary
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let src = self.source.digest_ref("sync")?;
        let dst = self.destination.push_ref()?;
        tracing::info!(source = %src, destination = %dst, "Syncing image");

        let source = RegistryClient::connect(
            ctx.connector(),
            &auth_for(self.source_registry.as_ref()),
            "source",
        )?;
        let destination = RegistryClient::connect(
            ctx.connector(),
            &self.destination_registry.auth(),
            "destination",
        )?;

        let digest = Syncer::new(source, destination)
            .with_platforms(&self.platforms)
            .sync_image(&src, &dst)
            .await?;

        self.destination.resolve(digest.clone());
        tracing::info!(dest_digest = %digest, "Image sync complete");
        Ok(())
    }
}

/// Builder for [`ImageSync`], created by [`Plan::sync`].
pub struct SyncBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    source: Option<Arc<Image>>,
    source_registry: Option<Arc<Registry>>,
    verified_by: Option<String>,
    destination: Option<(Arc<Image>, Arc<Registry>)>,
    platforms: Vec<Platform>,
}

impl<'p> SyncBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            source: None,
            source_registry: None,
            verified_by: None,
            destination: None,
            platforms: Vec::new(),
        }
    }

    /// Source image. It must carry a digest; syncing by tag is refused.
    pub fn source(mut self, image: Arc<Image>) -> Self {
        self.source = Some(image);
        self
    }

    /// Credentials for the source registry; anonymous otherwise.
    pub fn source_registry(mut self, registry: Arc<Registry>) -> Self {
        self.source_registry = Some(registry);
        self
    }

    /// Name of the scan that vetted the source image.
    pub fn verified_by(mut self, scan: impl Into<String>) -> Self {
        self.verified_by = Some(scan.into());
        self
    }

    /// Destination image (without digest) and the registry to push with.
    pub fn destination(mut self, image: Arc<Image>, registry: Arc<Registry>) -> Self {
        self.destination = Some((image, registry));
        self
    }

    /// Platforms to keep from multi-platform sources. Defaults to all
    /// supported platforms.
    pub fn platforms(mut self, platforms: &[Platform]) -> Self {
        self.platforms = platforms.to_vec();
        self
    }

    /// Validate and register the sync. Returns the destination image, whose
    /// digest is resolved when the sync executes.
    pub fn build(mut self) -> Result<Arc<Image>> {
        let mut problems = Vec::new();
        match &self.source {
            None => problems.push("sync source image is required".to_string()),
            Some(image) if image.digest().is_none() => problems.push(format!(
                "sync source image {} MUST have a digest (syncing by tag alone is not allowed)",
                image.name()
            )),
            Some(_) => {}
        }
        match &self.destination {
            None => problems.push("sync destination image and registry are required".to_string()),
            Some((image, _)) => {
                if image.digest().is_some() {
                    problems.push(format!(
                        "sync destination image {} must not carry a digest",
                        image.name()
                    ));
                }
                if let Some(owner) = image.producer() {
                    problems.push(format!(
                        "sync destination image {} is already the destination of sync '{}'",
                        image.name(),
                        owner
                    ));
                }
            }
        }
        if self.platforms.is_empty() {
            self.platforms = Platform::SUPPORTED.to_vec();
        }
        self.platforms.sort();
        self.platforms.dedup();

        let (Some(source), Some((destination, destination_registry)), true) =
            (self.source, self.destination, problems.is_empty())
        else {
            return Err(CranError::Validation {
                kind: "sync",
                name: self.name,
                problems,
            });
        };

        if destination.claim(&self.name).is_err() {
            return Err(CranError::Validation {
                kind: "sync",
                name: self.name,
                problems: vec![format!(
                    "sync destination image {} is already claimed",
                    destination.name()
                )],
            });
        }

        let span = tracing::info_span!(parent: self.plan.span(), "sync", sync = %self.name);
        if self.verified_by.is_none() {
            tracing::warn!(
                parent: &span,
                image = %source.name(),
                "Syncing {} WITHOUT scan verification; the image has not been vetted for vulnerabilities",
                source.name()
            );
        }
        if let Ok(dst) = destination.push_ref() {
            if dst.registry != destination_registry.host() {
                tracing::warn!(
                    parent: &span,
                    image_registry = %dst.registry,
                    credentials_for = %destination_registry.host(),
                    "Destination credentials are for a different registry than the image"
                );
            }
        }

        let sync = Arc::new(ImageSync {
            name: self.name,
            source,
            source_registry: self.source_registry,
            verified_by: self.verified_by,
            destination: destination.clone(),
            destination_registry,
            platforms: self.platforms,
            span,
        });
        self.plan.pipeline.push(StageKind::Syncs, sync);
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::MemoryRegistry;

    const DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

    fn pinned(name: &str) -> Arc<Image> {
        Image::builder(name).digest(DIGEST).build().unwrap()
    }

    fn tagged(name: &str) -> Arc<Image> {
        Image::builder(name).version("v1").build().unwrap()
    }

    #[test]
    fn test_source_without_digest_is_rejected() {
        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let err = plan
            .sync("vector")
            .source(tagged("timberio/vector"))
            .destination(tagged("ghcr.io/org/vector"), ghcr)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("MUST have a digest"));
        assert!(plan.pipeline().is_empty());
    }

    #[test]
    fn test_all_problems_reported() {
        let mut plan = Plan::new("test");
        let err = plan.sync("empty").build().unwrap_err();
        match err {
            CranError::Validation { problems, .. } => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_and_returned_handle() {
        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let destination = tagged("ghcr.io/org/vector");
        let returned = plan
            .sync("vector")
            .source(pinned("timberio/vector"))
            .verified_by("vector-scan")
            .destination(destination.clone(), ghcr)
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&returned, &destination));
        assert_eq!(returned.producer().as_deref(), Some("vector"));
        assert!(returned.digest().is_none());

        let stage = plan.pipeline().stage(StageKind::Syncs);
        assert_eq!(stage.resources().len(), 1);
        assert!(stage.resources()[0]
            .describe()
            .ends_with("[linux/amd64, linux/arm64], vetted by scan 'vector-scan'"));
    }

    #[test]
    fn test_destination_claimed_once() {
        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let destination = tagged("ghcr.io/org/vector");
        plan.sync("first")
            .source(pinned("timberio/vector"))
            .destination(destination.clone(), ghcr.clone())
            .build()
            .unwrap();
        let err = plan
            .sync("second")
            .source(pinned("timberio/vector"))
            .destination(destination, ghcr)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("already the destination of sync 'first'"));
    }

    #[tokio::test]
    async fn test_execute_resolves_destination_digest() {
        let registry = MemoryRegistry::new();
        let source_digest = registry.insert_image("timberio/vector:0.50.0", "vector").unwrap();

        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let source = Image::builder("timberio/vector")
            .digest(source_digest.clone())
            .build()
            .unwrap();
        let destination = plan
            .sync("vector")
            .source(source)
            .destination(tagged("ghcr.io/org/vector"), ghcr)
            .build()
            .unwrap();

        let ctx = ExecutionContext::new(Arc::new(registry.clone()));
        plan.pipeline().stage(StageKind::Syncs).resources()[0]
            .execute(&ctx)
            .await
            .unwrap();

        let pushed = registry.manifest("ghcr.io/org/vector:v1").unwrap();
        assert_eq!(destination.digest(), Some(pushed.digest()));
        assert_eq!(pushed.digest(), source_digest);
    }
}
