//! Image linting with dockle.

use std::path::PathBuf;

use async_trait::async_trait;
use cranberry_core::error::Result;
use serde::{Deserialize, Serialize};

use super::{tool_error, Invocation, RegistryLogin};

/// One dockle check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockleDetail {
    pub code: String,
    pub title: String,
    pub level: String,
    #[serde(default)]
    pub alerts: Vec<String>,
}

/// dockle JSON report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockleReport {
    #[serde(default)]
    pub details: Vec<DockleDetail>,
}

impl DockleReport {
    /// Number of details at `level` (`FATAL`, `WARN`, `INFO`).
    pub fn count(&self, level: &str) -> usize {
        self.details.iter().filter(|d| d.level == level).count()
    }

    pub fn format(&self) -> String {
        if self.details.is_empty() {
            return "No image issues found\n".to_string();
        }
        let mut out = String::from("IMAGE AUDIT RESULTS (dockle)\n");
        for detail in &self.details {
            out.push_str(&format!("[{}] {} - {}\n", detail.level, detail.code, detail.title));
            for alert in &detail.alerts {
                out.push_str(&format!("  - {}\n", alert));
            }
        }
        out.push_str(&format!("Total issues: {}\n", self.details.len()));
        out
    }
}

/// What to lint.
#[derive(Debug, Clone)]
pub struct ImageAuditRequest {
    pub image: String,
    pub ignore: Vec<String>,
    pub login: Option<RegistryLogin>,
}

#[async_trait]
pub trait ImageLinter: Send + Sync {
    async fn audit(&self, request: &ImageAuditRequest) -> Result<DockleReport>;
}

/// Runs the `dockle` CLI.
#[derive(Debug, Clone)]
pub struct Dockle {
    program: PathBuf,
}

impl Dockle {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ImageLinter for Dockle {
    async fn audit(&self, request: &ImageAuditRequest) -> Result<DockleReport> {
        tracing::info!(image = %request.image, "Auditing image with dockle");

        let mut invocation = Invocation::new("dockle", &self.program)
            .args(["--format", "json", "--exit-code", "1"]);
        for code in &request.ignore {
            invocation = invocation.arg("--ignore").arg(code);
        }
        // Credentials travel in the environment, never on the command line
        if let Some(login) = &request.login {
            invocation = invocation
                .env("DOCKLE_AUTH_URL", format!("https://{}", login.host))
                .env("DOCKLE_USERNAME", login.username.clone())
                .env("DOCKLE_PASSWORD", login.password.clone());
        }
        let output = invocation.arg(&request.image).output().await?;

        if output.stdout.trim().is_empty() {
            if output.success() {
                return Ok(DockleReport::default());
            }
            return Err(tool_error(
                "dockle",
                format!("Audit of {} failed: {}", request.image, output.stderr.trim()),
            ));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| tool_error("dockle", format!("Failed to parse output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "image": "ghcr.io/org/app:v1",
        "summary": {"fatal": 1, "warn": 1, "info": 1, "skip": 0, "pass": 10},
        "details": [
            {"code": "CIS-DI-0001", "title": "Create a user for the container", "level": "WARN",
             "alerts": ["Last user should not be root"]},
            {"code": "DKL-DI-0005", "title": "Clear apt-get caches", "level": "FATAL",
             "alerts": ["Use 'rm -rf /var/lib/apt/lists' after 'apt-get install'"]},
            {"code": "DKL-LI-0003", "title": "Only put necessary files", "level": "INFO",
             "alerts": []}
        ]
    }"#;

    #[test]
    fn test_parse_and_count() {
        let report: DockleReport = serde_json::from_str(REPORT).unwrap();
        assert_eq!(report.count("FATAL"), 1);
        assert_eq!(report.count("WARN"), 1);
        assert_eq!(report.count("INFO"), 1);
    }

    #[test]
    fn test_format() {
        let report: DockleReport = serde_json::from_str(REPORT).unwrap();
        let text = report.format();
        assert!(text.contains("[FATAL] DKL-DI-0005 - Clear apt-get caches"));
        assert!(text.contains("  - Last user should not be root"));
        assert_eq!(DockleReport::default().format(), "No image issues found\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dockle_passes_ignores_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("dockle");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '{\"details\":[{\"code\":\"%s\",\"title\":\"%s\",\"level\":\"INFO\"}]}' \"$6\" \"$DOCKLE_USERNAME\"\n",
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let report = Dockle::new(&script)
            .audit(&ImageAuditRequest {
                image: "ghcr.io/org/app:v1".to_string(),
                ignore: vec!["DKL-DI-0005".to_string()],
                login: Some(RegistryLogin {
                    host: "ghcr.io".to_string(),
                    username: "bot".to_string(),
                    password: "secret".to_string(),
                }),
            })
            .await
            .unwrap();
        assert_eq!(report.details[0].code, "DKL-DI-0005");
        assert_eq!(report.details[0].title, "bot");
    }
}
