//! The fixed execution pipeline, expressed as data.

use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::Result;
use tracing::Instrument;

use super::context::ExecutionContext;

/// The five stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    VersionChecks,
    Syncs,
    Builds,
    Scans,
    Audits,
}

impl StageKind {
    pub const ORDER: [StageKind; 5] = [
        StageKind::VersionChecks,
        StageKind::Syncs,
        StageKind::Builds,
        StageKind::Scans,
        StageKind::Audits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VersionChecks => "version checks",
            Self::Syncs => "syncs",
            Self::Builds => "builds",
            Self::Scans => "scans",
            Self::Audits => "audits",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executable plan entry.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource kind, e.g. `sync`.
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str;

    /// Span every event of this resource is recorded under.
    fn span(&self) -> &tracing::Span;

    /// One-line summary of what `execute` would do.
    fn describe(&self) -> String;

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()>;
}

/// One entry of a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub stage: StageKind,
    pub kind: &'static str,
    pub name: String,
    pub summary: String,
}

/// A named, homogeneous group of resources run in registration order.
pub struct Stage {
    kind: StageKind,
    resources: Vec<Arc<dyn Resource>>,
}

impl Stage {
    fn new(kind: StageKind) -> Self {
        Self {
            kind,
            resources: Vec::new(),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }

    /// Run every resource, stopping at the first failure.
    pub async fn run(&self, ctx: &ExecutionContext) -> Result<()> {
        tracing::info!(stage = %self.kind, resources = self.resources.len(), "Starting stage");
        for resource in &self.resources {
            ctx.ensure_active(|| format!("{} '{}'", resource.kind(), resource.name()))?;
            resource
                .execute(ctx)
                .instrument(resource.span().clone())
                .await
                .map_err(|e| e.in_resource(resource.kind(), resource.name()))?;
        }
        Ok(())
    }
}

/// All stages of a plan, always in [`StageKind::ORDER`].
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: StageKind::ORDER.into_iter().map(Stage::new).collect(),
        }
    }

    pub(crate) fn push(&mut self, kind: StageKind, resource: Arc<dyn Resource>) {
        self.stages[kind.index()].resources.push(resource);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, kind: StageKind) -> &Stage {
        &self.stages[kind.index()]
    }

    /// Total number of executable resources.
    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.resources.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn run(&self, ctx: &ExecutionContext) -> Result<()> {
        for stage in &self.stages {
            ctx.ensure_active(|| format!("stage {}", stage.kind))?;
            stage.run(ctx).await?;
        }
        Ok(())
    }

    pub fn planned_actions(&self) -> Vec<PlannedAction> {
        self.stages
            .iter()
            .flat_map(|stage| {
                stage.resources.iter().map(move |r| PlannedAction {
                    stage: stage.kind,
                    kind: r.kind(),
                    name: r.name().to_string(),
                    summary: r.describe(),
                })
            })
            .collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
