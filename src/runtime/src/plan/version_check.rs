//! Version checks: digest pin verification and update discovery.

use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use parking_lot::Mutex;

use super::context::ExecutionContext;
use super::image::Image;
use super::registry::{auth_for, Registry};
use super::stage::{Resource, StageKind};
use super::Plan;
use crate::oci::RegistryClient;
use crate::version::{VersionChecker, VersionInfo};

/// Checks an image's tag against its pinned digest and looks for newer
/// release tags.
#[derive(Debug)]
pub struct VersionCheck {
    name: String,
    image: Arc<Image>,
    registry: Option<Arc<Registry>>,
    outcome: Mutex<Option<VersionInfo>>,
    span: tracing::Span,
}

impl VersionCheck {
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Result of the last successful execution.
    pub fn outcome(&self) -> Option<VersionInfo> {
        self.outcome.lock().clone()
    }

    async fn verify_pin(&self, checker: &VersionChecker) -> Result<()> {
        let tag_ref = self.image.tag_ref()?;
        match self.image.digest() {
            Some(expected) => {
                tracing::debug!(expected_digest = %expected, "Verifying current version digest");
                let actual = checker.get_tag_digest(&tag_ref).await?;
                if actual != expected {
                    tracing::error!(
                        expected = %expected,
                        actual = %actual,
                        "Current version digest mismatch"
                    );
                    return Err(CranError::DigestMismatch {
                        reference: tag_ref.full_reference(),
                        expected,
                        actual,
                    });
                }
                tracing::info!(digest = %actual, "Current version digest verified");
            }
            None => match checker.get_tag_digest(&tag_ref).await {
                Ok(actual) => tracing::warn!(
                    tag = %tag_ref,
                    digest = %actual,
                    "No digest pinned for {}; pin digest {} to enable verification",
                    tag_ref,
                    actual
                ),
                Err(e) => tracing::warn!(
                    tag = %tag_ref,
                    error = %e,
                    "Failed to retrieve current version digest for verification"
                ),
            },
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for VersionCheck {
    fn kind(&self) -> &'static str {
        "version check"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn describe(&self) -> String {
        let pin = if self.image.digest().is_some() {
            "verify pinned digest, then "
        } else {
            ""
        };
        format!(
            "{}check {}:{} for newer releases",
            pin,
            self.image.name(),
            self.image.version().unwrap_or_default()
        )
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let version = self.image.version().unwrap_or_default();
        tracing::info!(image = %self.image.name(), version, "Checking for version updates");

        let client = RegistryClient::connect(
            ctx.connector(),
            &auth_for(self.registry.as_ref()),
            "source",
        )?;
        let checker = VersionChecker::new(client);

        // A moved tag must fail before any update lookup
        self.verify_pin(&checker).await?;

        let info = checker
            .check_version(&self.image.tag_ref()?, version, None)
            .await?;
        if info.update_available {
            tracing::warn!(
                image = %self.image.name(),
                current = %info.current_version,
                latest = %info.latest_version,
                digest = %info.latest_digest,
                "Update available"
            );
        } else {
            tracing::info!(image = %self.image.name(), version, "Up to date");
        }
        *self.outcome.lock() = Some(info);
        Ok(())
    }
}

/// Builder for [`VersionCheck`], created by [`Plan::version_check`].
pub struct VersionCheckBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    image: Option<Arc<Image>>,
    registry: Option<Arc<Registry>>,
}

impl<'p> VersionCheckBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            image: None,
            registry: None,
        }
    }

    /// Image to check. A pinned digest turns on tag verification.
    pub fn source(mut self, image: Arc<Image>) -> Self {
        self.image = Some(image);
        self
    }

    /// Credentials for private repositories; anonymous otherwise.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Arc<VersionCheck>> {
        let mut problems = Vec::new();
        match &self.image {
            None => problems.push("version check image is required".to_string()),
            Some(image) if image.version().is_none() => {
                problems.push("version check image must have a version".to_string())
            }
            Some(_) => {}
        }
        let Some(image) = self.image.filter(|_| problems.is_empty()) else {
            return Err(CranError::Validation {
                kind: "version check",
                name: self.name,
                problems,
            });
        };

        let check = Arc::new(VersionCheck {
            span: tracing::info_span!(parent: self.plan.span(), "version_check", version_check = %self.name),
            name: self.name,
            image,
            registry: self.registry,
            outcome: Mutex::new(None),
        });
        self.plan
            .pipeline
            .push(StageKind::VersionChecks, check.clone());
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{MemoryRegistry, RawManifest};

    fn digest_of(registry: &MemoryRegistry, reference: &str) -> String {
        registry.manifest(reference).map(|m: RawManifest| m.digest()).unwrap()
    }

    fn seeded() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        for tag in ["2.7.6", "2.8.4", "2.10.0", "2.11.0-beta.1", "latest"] {
            registry
                .insert_image(&format!("caddy:{}", tag), tag)
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_update_available() {
        let registry = seeded();
        let mut plan = Plan::new("test");
        let image = Image::builder("caddy").version("2.8.4").build().unwrap();
        let check = plan.version_check("caddy").source(image).build().unwrap();

        let ctx = ExecutionContext::new(Arc::new(registry));
        check.execute(&ctx).await.unwrap();

        let info = check.outcome().unwrap();
        assert_eq!(info.latest_version, "2.10.0");
        assert!(info.update_available);
    }

    #[tokio::test]
    async fn test_pinned_digest_verified() {
        let registry = seeded();
        let digest = digest_of(&registry, "caddy:2.10.0");
        let mut plan = Plan::new("test");
        let image = Image::builder("caddy")
            .version("2.10.0")
            .digest(digest)
            .build()
            .unwrap();
        let check = plan.version_check("caddy").source(image).build().unwrap();

        check
            .execute(&ExecutionContext::new(Arc::new(registry)))
            .await
            .unwrap();
        assert!(!check.outcome().unwrap().update_available);
    }

    #[tokio::test]
    async fn test_digest_mismatch_fails_before_update_check() {
        let registry = seeded();
        let moved_to = digest_of(&registry, "caddy:2.7.6");
        let pinned = digest_of(&registry, "caddy:2.8.4");
        // The tag was re-pointed after it was pinned
        registry
            .insert_manifest("caddy:2.8.4", registry.manifest("caddy:2.7.6").unwrap())
            .unwrap();

        let mut plan = Plan::new("test");
        let image = Image::builder("caddy")
            .version("2.8.4")
            .digest(pinned.clone())
            .build()
            .unwrap();
        let check = plan.version_check("caddy").source(image).build().unwrap();

        let err = check
            .execute(&ExecutionContext::new(Arc::new(registry)))
            .await
            .unwrap_err();
        match err {
            CranError::DigestMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, pinned);
                assert_eq!(actual, moved_to);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check.outcome().is_none());
    }

    #[test]
    fn test_version_required() {
        let mut plan = Plan::new("test");
        let image = Image::builder("caddy").build().unwrap();
        let err = plan.version_check("caddy").source(image).build().unwrap_err();
        assert!(err.to_string().contains("must have a version"));

        let err = plan.version_check("nothing").build().unwrap_err();
        assert!(err.to_string().contains("image is required"));
        assert!(plan.pipeline().is_empty());
    }
}
