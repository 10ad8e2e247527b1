//! Vulnerability scans with per-severity actions.

use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;
use serde::{Deserialize, Serialize};

use super::context::ExecutionContext;
use super::image::Image;
use super::registry::{login_for, Registry};
use super::stage::{Resource, StageKind};
use super::Plan;
use crate::tools::{ScanReport, ScanRequest, ScanTarget, Severity};

/// What to do when findings reach a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Fail the scan and the plan.
    Error,
    Warn,
    Info,
}

/// Report rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Table,
    Json,
}

/// A threshold and the action taken when findings reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCheck {
    pub threshold: Severity,
    pub action: Action,
}

impl SeverityCheck {
    pub fn new(threshold: Severity, action: Action) -> Self {
        Self { threshold, action }
    }
}

/// Scans an image by digest and applies severity checks in order.
pub struct Scan {
    name: String,
    image: Arc<Image>,
    registry: Option<Arc<Registry>>,
    checks: Vec<SeverityCheck>,
    format: Format,
    span: tracing::Span,
}

impl Scan {
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn checks(&self) -> &[SeverityCheck] {
        &self.checks
    }

    pub fn format(&self) -> Format {
        self.format
    }
}

/// Keep only findings at or above `threshold`, dropping empty targets.
pub fn filter_at_or_above(report: &ScanReport, threshold: Severity) -> ScanReport {
    let results = report
        .results
        .iter()
        .filter_map(|target| {
            let vulnerabilities: Vec<_> = target
                .vulnerabilities
                .iter()
                .filter(|v| v.severity_level() >= threshold)
                .cloned()
                .collect();
            (!vulnerabilities.is_empty()).then(|| ScanTarget {
                target: target.target.clone(),
                vulnerabilities,
            })
        })
        .collect();
    ScanReport { results }
}

/// Render a report as a table or pretty JSON.
pub fn format_report(report: &ScanReport, format: Format) -> Result<String> {
    match format {
        Format::Json => Ok(serde_json::to_string_pretty(report)?),
        Format::Table => {
            let mut table = comfy_table::Table::new();
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
            table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
            table.set_header(vec![
                "TARGET",
                "LIBRARY",
                "VULNERABILITY",
                "SEVERITY",
                "INSTALLED",
                "FIXED",
                "TITLE",
            ]);
            for target in &report.results {
                for vuln in &target.vulnerabilities {
                    table.add_row(vec![
                        target.target.clone(),
                        vuln.package.clone(),
                        vuln.id.clone(),
                        vuln.severity.clone(),
                        vuln.installed_version.clone(),
                        vuln.fixed_version.clone(),
                        vuln.title.clone(),
                    ]);
                }
            }
            Ok(format!(
                "{}\nTotal: {}",
                table,
                report.vulnerability_count()
            ))
        }
    }
}

#[async_trait]
impl Resource for Scan {
    fn kind(&self) -> &'static str {
        "scan"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn describe(&self) -> String {
        let checks: Vec<_> = self
            .checks
            .iter()
            .map(|c| format!("{}:{:?}", c.threshold, c.action).to_lowercase())
            .collect();
        let target = match (self.image.digest(), self.image.producer()) {
            (Some(digest), _) => format!("{}@{}", self.image.name(), digest),
            (None, Some(sync)) => format!("{} (digest from sync '{}')", self.image.name(), sync),
            (None, None) => format!("{} (no digest)", self.image.name()),
        };
        format!("scan {} checking [{}]", target, checks.join(", "))
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let reference = self.image.digest_ref("scan")?;
        tracing::info!(image = %reference, format = ?self.format, "Scanning image");

        let report = ctx
            .scanner()
            .scan(&ScanRequest {
                image: reference.full_reference(),
                platforms: Platform::SUPPORTED.to_vec(),
                severities: Severity::ALL.to_vec(),
                login: login_for(self.registry.as_ref()),
            })
            .await?;

        for check in &self.checks {
            let matching = filter_at_or_above(&report, check.threshold);
            let count = matching.vulnerability_count();
            if count == 0 {
                continue;
            }
            let output = format_report(&matching, self.format)?;
            let threshold = check.threshold.as_str();
            match check.action {
                Action::Error => {
                    tracing::error!(threshold, count, "Vulnerabilities found at or above threshold");
                    tracing::error!("\n{}", output);
                    return Err(CranError::ThresholdExceeded {
                        threshold: threshold.to_string(),
                        count,
                    });
                }
                Action::Warn => {
                    tracing::warn!(threshold, count, "Vulnerabilities found at or above threshold");
                    tracing::warn!("\n{}", output);
                }
                Action::Info => {
                    tracing::info!(threshold, count, "Vulnerabilities found at or above threshold");
                    tracing::info!("\n{}", output);
                }
            }
        }

        tracing::info!("Scan complete");
        Ok(())
    }
}

/// Builder for [`Scan`], created by [`Plan::scan`].
pub struct ScanBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    image: Option<Arc<Image>>,
    registry: Option<Arc<Registry>>,
    checks: Vec<SeverityCheck>,
    format: Format,
}

impl<'p> ScanBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            image: None,
            registry: None,
            checks: Vec::new(),
            format: Format::default(),
        }
    }

    /// Image to scan. Its digest may be resolved later by a sync.
    pub fn source(mut self, image: Arc<Image>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a check. Checks run in the order added; the first failing
    /// `Action::Error` check stops the scan.
    pub fn severity(mut self, threshold: Severity, action: Action) -> Self {
        self.checks.push(SeverityCheck::new(threshold, action));
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn build(self) -> Result<Arc<Scan>> {
        let Some(image) = self.image else {
            return Err(CranError::Validation {
                kind: "scan",
                name: self.name,
                problems: vec!["scan image is required".to_string()],
            });
        };

        let span = tracing::info_span!(parent: self.plan.span(), "scan", scan = %self.name);
        if image.digest().is_none() && image.producer().is_none() {
            tracing::warn!(
                parent: &span,
                image = %image.name(),
                "Scan image has no digest and no sync produces one; execution will fail"
            );
        }

        let checks = if self.checks.is_empty() {
            vec![
                SeverityCheck::new(Severity::High, Action::Error),
                SeverityCheck::new(Severity::Critical, Action::Error),
            ]
        } else {
            self.checks
        };

        let scan = Arc::new(Scan {
            name: self.name,
            image,
            registry: self.registry,
            checks,
            format: self.format,
            span,
        });
        self.plan.pipeline.push(StageKind::Scans, scan.clone());
        Ok(scan)
    }
}
