//! Dockerfile and image audits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use super::image::Image;
use super::registry::{login_for, Registry};
use super::stage::{Resource, StageKind};
use super::Plan;
use crate::tools::hadolint::format_issues;
use crate::tools::{DockleReport, ImageAuditRequest};

/// Which image linter levels fail an audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSet {
    /// FATAL and WARN findings fail.
    #[default]
    Strict,
    /// FATAL findings fail.
    Recommended,
    /// FATAL findings fail.
    Minimal,
}

impl RuleSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Recommended => "recommended",
            Self::Minimal => "minimal",
        }
    }

    /// Levels that cause failure under this rule set.
    pub fn failing_levels(&self) -> &'static [&'static str] {
        match self {
            Self::Strict => &["FATAL", "WARN"],
            Self::Recommended | Self::Minimal => &["FATAL"],
        }
    }

    pub fn passes(&self, report: &DockleReport) -> bool {
        self.failing_levels()
            .iter()
            .all(|level| report.count(level) == 0)
    }
}

/// Lints a Dockerfile, an image, or both. Passes only when every
/// configured linter passes.
#[derive(Debug)]
pub struct Audit {
    name: String,
    dockerfile: Option<PathBuf>,
    image: Option<Arc<Image>>,
    registry: Option<Arc<Registry>>,
    rule_set: RuleSet,
    ignore: Vec<String>,
    span: tracing::Span,
}

impl Audit {
    pub fn rule_set(&self) -> RuleSet {
        self.rule_set
    }

    async fn audit_dockerfile(&self, ctx: &ExecutionContext, dockerfile: &Path) -> Result<bool> {
        let issues = ctx.dockerfile_linter().lint(dockerfile).await?;
        tracing::info!("\n{}", format_issues(&issues));
        Ok(issues.is_empty())
    }

    async fn audit_image(&self, ctx: &ExecutionContext, image: &Image) -> Result<bool> {
        let reference = image.best_ref()?;
        let report = ctx
            .image_linter()
            .audit(&ImageAuditRequest {
                image: reference.full_reference(),
                ignore: self.ignore.clone(),
                login: login_for(self.registry.as_ref()),
            })
            .await?;
        tracing::info!("\n{}", report.format());
        Ok(self.rule_set.passes(&report))
    }
}

#[async_trait]
impl Resource for Audit {
    fn kind(&self) -> &'static str {
        "audit"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn describe(&self) -> String {
        let mut targets = Vec::new();
        if let Some(dockerfile) = &self.dockerfile {
            targets.push(format!("dockerfile {}", dockerfile.display()));
        }
        if let Some(image) = &self.image {
            targets.push(format!("image {}", image.name()));
        }
        format!("audit {} ({} rules)", targets.join(" and "), self.rule_set.as_str())
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        tracing::info!(
            dockerfile = ?self.dockerfile,
            image = ?self.image.as_ref().map(|i| i.name()),
            ruleset = self.rule_set.as_str(),
            "Auditing"
        );

        let mut failed = Vec::new();
        if let Some(dockerfile) = &self.dockerfile {
            if !self.audit_dockerfile(ctx, dockerfile).await? {
                failed.push(format!("Dockerfile {}", dockerfile.display()));
            }
        }
        if let Some(image) = &self.image {
            if !self.audit_image(ctx, image).await? {
                failed.push(format!("image {}", image.name()));
            }
        }

        if !failed.is_empty() {
            tracing::warn!("Audit found issues");
            return Err(CranError::AuditFailed(failed.join(", ")));
        }
        tracing::info!("Audit passed");
        Ok(())
    }
}

/// Builder for [`Audit`], created by [`Plan::audit`].
pub struct AuditBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    dockerfile: Option<PathBuf>,
    image: Option<Arc<Image>>,
    registry: Option<Arc<Registry>>,
    rule_set: RuleSet,
    ignore: Vec<String>,
}

impl<'p> AuditBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            dockerfile: None,
            image: None,
            registry: None,
            rule_set: RuleSet::default(),
            ignore: Vec::new(),
        }
    }

    pub fn dockerfile(mut self, dockerfile: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }

    pub fn source(mut self, image: Arc<Image>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn rule_set(mut self, rule_set: RuleSet) -> Self {
        self.rule_set = rule_set;
        self
    }

    /// Image linter check codes to skip (e.g. `CIS-DI-0001`).
    pub fn ignore_checks<I, S>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(checks.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Arc<Audit>> {
        let mut problems = Vec::new();
        if self.dockerfile.is_none() && self.image.is_none() {
            problems.push("audit requires either a dockerfile or an image".to_string());
        }
        if let Some(image) = &self.image {
            if image.version().is_none() && image.digest().is_none() && image.producer().is_none()
            {
                problems.push(format!(
                    "audit image {} needs a version or a digest",
                    image.name()
                ));
            }
        }
        if !problems.is_empty() {
            return Err(CranError::Validation {
                kind: "audit",
                name: self.name,
                problems,
            });
        }

        let audit = Arc::new(Audit {
            span: tracing::info_span!(parent: self.plan.span(), "audit", audit = %self.name),
            name: self.name,
            dockerfile: self.dockerfile,
            image: self.image,
            registry: self.registry,
            rule_set: self.rule_set,
            ignore: self.ignore,
        });
        self.plan.pipeline.push(StageKind::Audits, audit.clone());
        Ok(audit)
    }
}
