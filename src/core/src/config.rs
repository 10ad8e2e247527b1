use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CranError, Result};

/// Cranberry settings
///
/// Loaded from `~/.cranberry/config.yaml` or an explicit path. Every field
/// has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging configuration
    pub log: LogConfig,

    /// External tool locations
    pub tools: ToolsConfig,

    /// Registry transport settings
    pub registry: RegistrySettings,
}

impl Settings {
    /// Default settings file location (`~/.cranberry/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".cranberry").join("config.yaml"))
    }

    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CranError::ConfigError(format!(
                "Failed to read settings {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&data)
    }

    /// Load settings from the default location, falling back to defaults
    /// when the file does not exist.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Parse settings from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive (e.g. "info", "cranberry_runtime=debug").
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Binary names or paths for the external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub trivy: PathBuf,
    pub hadolint: PathBuf,
    pub dockle: PathBuf,
    pub ssh: PathBuf,
    pub scp: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            trivy: PathBuf::from("trivy"),
            hadolint: PathBuf::from("hadolint"),
            dockle: PathBuf::from("dockle"),
            ssh: PathBuf::from("ssh"),
            scp: PathBuf::from("scp"),
        }
    }
}

/// Registry transport settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Registry hosts reached over plain HTTP (e.g. "localhost:5000")
    pub insecure: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert_eq!(settings.tools.trivy, PathBuf::from("trivy"));
        assert_eq!(settings.tools.scp, PathBuf::from("scp"));
        assert!(settings.registry.insecure.is_empty());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let settings = Settings::from_yaml("").unwrap();
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let settings = Settings::from_yaml(
            "log:\n  format: json\ntools:\n  trivy: /opt/bin/trivy\nregistry:\n  insecure: [\"localhost:5000\"]\n",
        )
        .unwrap();
        assert_eq!(settings.log.format, LogFormat::Json);
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.tools.trivy, PathBuf::from("/opt/bin/trivy"));
        assert_eq!(settings.tools.dockle, PathBuf::from("dockle"));
        assert_eq!(settings.registry.insecure, vec!["localhost:5000".to_string()]);
    }

    #[test]
    fn test_invalid_yaml() {
        let result = Settings::from_yaml("log: [unterminated");
        assert!(matches!(result, Err(CranError::SerializationError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "log:\n  level: debug\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = Settings::load(&tmp.path().join("missing.yaml"));
        assert!(matches!(result, Err(CranError::ConfigError(_))));
    }
}
