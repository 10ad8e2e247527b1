//! Declarative image plans.
//!
//! A [`Plan`] collects registries, build nodes and operation resources
//! through fallible builders, then runs the operations in a fixed order:
//! version checks, syncs, builds, scans, audits. The first failing resource
//! stops the run.
//!
//! ```ignore
//! let mut plan = Plan::new("mirror");
//! let ghcr = plan.registry("ghcr.io").username(user).password(token).build()?;
//! let source = Image::builder("timberio/vector").digest(digest).build()?;
//! let mirrored = plan
//!     .sync("vector")
//!     .source(source)
//!     .destination(Image::builder("ghcr.io/org/vector").version("0.50.0").build()?, ghcr.clone())
//!     .build()?;
//! plan.scan("vector-scan").source(mirrored).registry(ghcr).build()?;
//! plan.execute(&ExecutionContext::from_settings(&settings)).await?;
//! ```

mod audit;
mod build;
mod build_node;
mod context;
mod image;
pub mod manifest;
mod registry;
mod scan;
mod stage;
mod sync;
mod version_check;

use std::sync::Arc;

use cranberry_core::error::Result;
use tracing::Instrument;

pub use audit::{Audit, AuditBuilder, RuleSet};
pub use build::{Build, BuildBuilder};
pub use build_node::{BuildNode, BuildNodeBuilder};
pub use context::ExecutionContext;
pub use image::{Image, ImageBuilder};
pub use registry::{Registry, RegistryBuilder};
pub use scan::{
    filter_at_or_above, format_report, Action, Format, Scan, ScanBuilder, SeverityCheck,
};
pub use stage::{Pipeline, PlannedAction, Resource, Stage, StageKind};
pub use sync::{ImageSync, SyncBuilder};
pub use version_check::{VersionCheck, VersionCheckBuilder};

/// A named set of resources executed as one pipeline.
///
/// Resources are only ever added, through builders that borrow the plan
/// mutably; execution borrows it shared, so nothing can be registered
/// while a run is in progress.
pub struct Plan {
    name: String,
    span: tracing::Span,
    registries: Vec<Arc<Registry>>,
    build_nodes: Vec<Arc<BuildNode>>,
    pipeline: Pipeline,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            span: tracing::info_span!("plan", plan = %name),
            name,
            registries: Vec::new(),
            build_nodes: Vec::new(),
            pipeline: Pipeline::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn registries(&self) -> &[Arc<Registry>] {
        &self.registries
    }

    pub fn build_nodes(&self) -> &[Arc<BuildNode>] {
        &self.build_nodes
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn registry(&mut self, host: impl Into<String>) -> RegistryBuilder<'_> {
        RegistryBuilder::new(self, host.into())
    }

    pub fn build_node(&mut self, name: impl Into<String>) -> BuildNodeBuilder<'_> {
        BuildNodeBuilder::new(self, name.into())
    }

    pub fn version_check(&mut self, name: impl Into<String>) -> VersionCheckBuilder<'_> {
        VersionCheckBuilder::new(self, name.into())
    }

    pub fn sync(&mut self, name: impl Into<String>) -> SyncBuilder<'_> {
        SyncBuilder::new(self, name.into())
    }

    pub fn build(&mut self, name: impl Into<String>) -> BuildBuilder<'_> {
        BuildBuilder::new(self, name.into())
    }

    pub fn scan(&mut self, name: impl Into<String>) -> ScanBuilder<'_> {
        ScanBuilder::new(self, name.into())
    }

    pub fn audit(&mut self, name: impl Into<String>) -> AuditBuilder<'_> {
        AuditBuilder::new(self, name.into())
    }

    /// Run every stage in order, stopping at the first failure.
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        async {
            tracing::info!(resources = self.pipeline.len(), "Executing plan");
            self.pipeline.run(ctx).await?;
            tracing::info!("Plan execution complete");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Report what `execute` would do without touching any registry or tool.
    pub fn dry_run(&self) -> Vec<PlannedAction> {
        let _entered = self.span.enter();
        tracing::info!("Dry run (no changes will be made)");
        let actions = self.pipeline.planned_actions();
        for action in &actions {
            tracing::info!(
                stage = %action.stage,
                kind = action.kind,
                name = %action.name,
                "{}",
                action.summary
            );
        }
        actions
    }
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("registries", &self.registries.len())
            .field("build_nodes", &self.build_nodes.len())
            .field("resources", &self.pipeline.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::MemoryRegistry;
    use crate::tools::{ScanReport, ScanRequest, Scanner};
    use async_trait::async_trait;
    use cranberry_core::error::CranError;
    use parking_lot::Mutex;

    struct RecordingScanner {
        images: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Scanner for RecordingScanner {
        async fn scan(&self, request: &ScanRequest) -> Result<ScanReport> {
            self.images.lock().push(request.image.clone());
            Ok(ScanReport::default())
        }
    }

    #[tokio::test]
    async fn test_scan_sees_digest_from_earlier_sync() {
        let registry = MemoryRegistry::new();
        let digest = registry.insert_image("timberio/vector:0.50.0", "vector").unwrap();

        let mut plan = Plan::new("mirror");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let source = Image::builder("timberio/vector").digest(digest).build().unwrap();
        let destination = Image::builder("ghcr.io/org/vector").version("0.50.0").build().unwrap();
        let mirrored = plan
            .sync("vector")
            .source(source)
            .destination(destination, ghcr)
            .build()
            .unwrap();
        // Registered before anything runs; the digest is resolved by the sync
        plan.scan("vector-scan").source(mirrored.clone()).build().unwrap();

        let scanner = Arc::new(RecordingScanner {
            images: Mutex::new(Vec::new()),
        });
        let ctx = ExecutionContext::new(Arc::new(registry)).with_scanner(scanner.clone());
        plan.execute(&ctx).await.unwrap();

        let resolved = mirrored.digest().unwrap();
        assert_eq!(
            *scanner.images.lock(),
            vec![format!("ghcr.io/org/vector@{}", resolved)]
        );
    }

    #[tokio::test]
    async fn test_failure_names_resource() {
        let registry = MemoryRegistry::new();
        let mut plan = Plan::new("broken");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let source = Image::builder("timberio/vector")
            .digest("sha256:5555555555555555555555555555555555555555555555555555555555555555")
            .build()
            .unwrap();
        plan.sync("missing")
            .source(source)
            .destination(Image::builder("ghcr.io/org/vector").build().unwrap(), ghcr)
            .build()
            .unwrap();

        let err = plan
            .execute(&ExecutionContext::new(Arc::new(registry)))
            .await
            .unwrap_err();
        match err {
            CranError::ResourceFailed { kind, name, source } => {
                assert_eq!(kind, "sync");
                assert_eq!(name, "missing");
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dry_run_lists_actions_in_stage_order() {
        let mut plan = Plan::new("dry");
        let image = Image::builder("caddy").version("2.8.4").build().unwrap();
        plan.version_check("caddy").source(image.clone()).build().unwrap();
        plan.audit("caddy-audit").source(image).build().unwrap();

        let actions = plan.dry_run();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, "version check");
        assert_eq!(actions[1].stage, StageKind::Audits);
        assert!(plan.pipeline().stage(StageKind::Syncs).resources().is_empty());
    }
}
