//! Dockerfile linting with hadolint.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cranberry_core::error::Result;
use serde::{Deserialize, Serialize};

use super::{tool_error, Invocation};

/// One hadolint finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HadolintIssue {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub line: u32,
    pub level: String,
}

#[async_trait]
pub trait DockerfileLinter: Send + Sync {
    /// Lint a Dockerfile, returning every issue found.
    async fn lint(&self, dockerfile: &Path) -> Result<Vec<HadolintIssue>>;
}

/// Runs the `hadolint` CLI.
#[derive(Debug, Clone)]
pub struct Hadolint {
    program: PathBuf,
}

impl Hadolint {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DockerfileLinter for Hadolint {
    async fn lint(&self, dockerfile: &Path) -> Result<Vec<HadolintIssue>> {
        tracing::info!(dockerfile = %dockerfile.display(), "Auditing Dockerfile with hadolint");
        let output = Invocation::new("hadolint", &self.program)
            .args(["--format", "json"])
            .arg(dockerfile.to_string_lossy())
            .output()
            .await?;

        // hadolint exits non-zero when it reports issues
        if output.stdout.trim().is_empty() {
            if output.success() {
                return Ok(Vec::new());
            }
            return Err(tool_error(
                "hadolint",
                format!("Lint of {} failed: {}", dockerfile.display(), output.stderr.trim()),
            ));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| tool_error("hadolint", format!("Failed to parse output: {}", e)))
    }
}

/// Human-readable listing of hadolint issues.
pub fn format_issues(issues: &[HadolintIssue]) -> String {
    if issues.is_empty() {
        return "No Dockerfile issues found\n".to_string();
    }
    let mut out = String::from("DOCKERFILE AUDIT RESULTS (hadolint)\n");
    for issue in issues {
        out.push_str(&format!(
            "[{}] Line {}: {}\n  {}\n",
            issue.level, issue.line, issue.code, issue.message
        ));
    }
    out.push_str(&format!("Total issues: {}\n", issues.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hadolint_output() {
        let json = r#"[{"code":"DL3008","column":1,"file":"Dockerfile","level":"warning",
                        "line":4,"message":"Pin versions in apt get install"}]"#;
        let issues: Vec<HadolintIssue> = serde_json::from_str(json).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, "DL3008");
        assert_eq!(issues[0].line, 4);
    }

    #[test]
    fn test_format_issues() {
        assert_eq!(format_issues(&[]), "No Dockerfile issues found\n");
        let text = format_issues(&[HadolintIssue {
            code: "DL3007".to_string(),
            message: "Using latest is prone to errors".to_string(),
            line: 1,
            level: "warning".to_string(),
        }]);
        assert!(text.contains("[warning] Line 1: DL3007"));
        assert!(text.ends_with("Total issues: 1\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hadolint_clean_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hadolint");
        std::fs::write(&script, "#!/bin/sh\necho '[]'\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let issues = Hadolint::new(&script)
            .lint(Path::new("Dockerfile"))
            .await
            .unwrap();
        assert!(issues.is_empty());
    }
}
