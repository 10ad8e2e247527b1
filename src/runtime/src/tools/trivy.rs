//! Vulnerability scanning with Trivy.

use std::path::PathBuf;

use async_trait::async_trait;
use cranberry_core::error::Result;
use cranberry_core::platform::Platform;
use serde::{Deserialize, Deserializer, Serialize};

use super::{tool_error, Invocation, RegistryLogin};

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Unknown,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Parse a scanner severity; anything unrecognised is `Unknown`.
    pub fn from_report(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value))
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single vulnerability finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "VulnerabilityID")]
    pub id: String,
    #[serde(rename = "PkgName")]
    pub package: String,
    #[serde(rename = "InstalledVersion", default)]
    pub installed_version: String,
    #[serde(rename = "FixedVersion", default)]
    pub fixed_version: String,
    #[serde(rename = "Severity")]
    pub severity: String,
    #[serde(rename = "Title", default)]
    pub title: String,
}

impl Vulnerability {
    pub fn severity_level(&self) -> Severity {
        Severity::from_report(&self.severity)
    }
}

/// Findings for one scan target (an OS package set or language manifest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "Vulnerabilities", default, deserialize_with = "null_as_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Trivy JSON report, possibly aggregated over several platforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "Results", default, deserialize_with = "null_as_empty")]
    pub results: Vec<ScanTarget>,
}

impl ScanReport {
    pub fn vulnerability_count(&self) -> usize {
        self.results.iter().map(|r| r.vulnerabilities.len()).sum()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// What to scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Digest reference of the image.
    pub image: String,
    pub platforms: Vec<Platform>,
    pub severities: Vec<Severity>,
    pub login: Option<RegistryLogin>,
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan every requested platform and aggregate the findings.
    async fn scan(&self, request: &ScanRequest) -> Result<ScanReport>;
}

/// Runs the `trivy` CLI.
#[derive(Debug, Clone)]
pub struct TrivyScanner {
    program: PathBuf,
}

impl TrivyScanner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn login(&self, login: &RegistryLogin) -> Result<()> {
        let output = Invocation::new("trivy", &self.program)
            .args(["registry", "login", "--username", login.username.as_str()])
            .args(["--password-stdin", login.host.as_str()])
            .stdin(login.password.clone())
            .output()
            .await?;
        if !output.success() {
            return Err(tool_error(
                "trivy",
                format!("Registry login to {} failed: {}", login.host, output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn scan_platform(
        &self,
        request: &ScanRequest,
        platform: Platform,
    ) -> Result<ScanReport> {
        let severities = request
            .severities
            .iter()
            .map(Severity::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let output = Invocation::new("trivy", &self.program)
            .args(["image", "--platform", platform.as_str(), "--format", "json"])
            .args(["--severity", severities.as_str(), "--quiet"])
            .arg(&request.image)
            .output()
            .await?;

        // Trivy may exit non-zero with a usable report
        if !output.success() {
            tracing::debug!(
                platform = %platform,
                code = ?output.code,
                stderr = %output.stderr,
                "Trivy exited with non-zero status"
            );
        }

        let report: ScanReport = serde_json::from_str(&output.stdout).map_err(|e| {
            tool_error(
                "trivy",
                format!(
                    "Failed to parse output for {}: {} (stderr: {})",
                    platform,
                    e,
                    output.stderr.trim()
                ),
            )
        })?;
        tracing::debug!(
            platform = %platform,
            vulnerabilities = report.vulnerability_count(),
            "Platform scan complete"
        );
        Ok(report)
    }
}

#[async_trait]
impl Scanner for TrivyScanner {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanReport> {
        if let Some(login) = &request.login {
            self.login(login).await?;
        }

        tracing::info!(image = %request.image, platforms = ?request.platforms, "Scanning image");
        let mut aggregated = ScanReport::default();
        for platform in &request.platforms {
            let report = self.scan_platform(request, *platform).await?;
            aggregated.results.extend(report.results);
        }
        tracing::info!(total_results = aggregated.results.len(), "Multi-platform scan complete");
        Ok(aggregated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "SchemaVersion": 2,
        "ArtifactName": "ghcr.io/org/app@sha256:abc",
        "Results": [
            {"Target": "app (debian 12.5)", "Class": "os-pkgs", "Type": "debian",
             "Vulnerabilities": [
                {"VulnerabilityID": "CVE-2024-0001", "PkgName": "openssl",
                 "InstalledVersion": "3.0.11", "FixedVersion": "3.0.13",
                 "Severity": "CRITICAL", "Title": "openssl: bad things"},
                {"VulnerabilityID": "CVE-2024-0002", "PkgName": "zlib",
                 "InstalledVersion": "1.2.13", "Severity": "LOW"}
             ]},
            {"Target": "usr/bin/app", "Class": "lang-pkgs", "Vulnerabilities": null}
        ]
    }"#;

    #[test]
    fn test_parse_trivy_report() {
        let report: ScanReport = serde_json::from_str(REPORT).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.vulnerability_count(), 2);
        let vuln = &report.results[0].vulnerabilities[1];
        assert_eq!(vuln.package, "zlib");
        assert_eq!(vuln.fixed_version, "");
        assert_eq!(vuln.severity_level(), Severity::Low);
        assert!(report.results[1].vulnerabilities.is_empty());
    }

    #[test]
    fn test_parse_report_without_results() {
        let report: ScanReport = serde_json::from_str(r#"{"SchemaVersion": 2}"#).unwrap();
        assert_eq!(report.vulnerability_count(), 0);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::Unknown);
    }

    #[test]
    fn test_severity_from_report() {
        assert_eq!(Severity::from_report("HIGH"), Severity::High);
        assert_eq!(Severity::from_report("critical"), Severity::Critical);
        assert_eq!(Severity::from_report("NEGLIGIBLE"), Severity::Unknown);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trivy_scanner_aggregates_platforms() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("trivy");
        let report_path = dir.path().join("report.json");
        std::fs::write(&report_path, REPORT).unwrap();
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat {}\nexit 1\n", report_path.display()),
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scanner = TrivyScanner::new(&script);
        let report = scanner
            .scan(&ScanRequest {
                image: "ghcr.io/org/app@sha256:abc".to_string(),
                platforms: Platform::SUPPORTED.to_vec(),
                severities: Severity::ALL.to_vec(),
                login: None,
            })
            .await
            .unwrap();
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.vulnerability_count(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_trivy_scanner_rejects_garbage_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("trivy");
        std::fs::write(&script, "#!/bin/sh\necho 'FATAL image not found' >&2\nexit 1\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = TrivyScanner::new(&script)
            .scan(&ScanRequest {
                image: "ghcr.io/org/app@sha256:abc".to_string(),
                platforms: vec![Platform::LinuxAmd64],
                severities: Severity::ALL.to_vec(),
                login: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("image not found"));
    }
}
