use thiserror::Error;

/// Cranberry error types
#[derive(Error, Debug)]
pub enum CranError {
    /// A resource builder rejected its configuration
    #[error("Invalid {kind} '{name}': {}", .problems.join("; "))]
    Validation {
        kind: &'static str,
        name: String,
        problems: Vec<String>,
    },

    /// Image reference could not be parsed
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// The registry answered "not found" for a manifest, blob or repository
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container registry error (network, auth, malformed response)
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// A tag no longer points at the pinned digest
    #[error(
        "DIGEST MISMATCH (possible tag mutation or supply chain attack): \
         {reference} points to {actual}, expected {expected}"
    )]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    /// An operation that requires a digest reference was given a tag only
    #[error("{operation} image {image} MUST have a digest ({operation} by tag alone is not allowed){}",
        .pending_on.as_ref().map(|s| format!(", still awaiting sync '{s}'")).unwrap_or_default())]
    MissingDigest {
        operation: &'static str,
        image: String,
        pending_on: Option<String>,
    },

    /// Tag listing produced no usable release versions
    #[error("No valid versions found: {0}")]
    NoValidVersions(String),

    /// A multi-platform source carried none of the platforms we sync
    #[error("No supported platforms in {reference} (found: {})", .found.join(", "))]
    NoSupportedPlatforms {
        reference: String,
        found: Vec<String>,
    },

    /// Scan findings at or above an `error` threshold
    #[error("Vulnerabilities found at or above threshold {threshold}: {count}")]
    ThresholdExceeded { threshold: String, count: usize },

    /// Dockerfile or image audit reported failing issues
    #[error("Audit found issues: {0}")]
    AuditFailed(String),

    /// External tool (scanner, linter, builder) failed
    #[error("Tool error: {tool} - {message}")]
    ToolError { tool: String, message: String },

    /// A plan resource failed during execution
    #[error("{kind} '{name}' failed: {source}")]
    ResourceFailed {
        kind: &'static str,
        name: String,
        #[source]
        source: Box<CranError>,
    },

    /// Execution was cancelled between stages or resources
    #[error("Plan execution cancelled before {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CranError {
    /// Whether this is the distinguished "not found" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CranError::NotFound(_))
    }

    /// Wrap an execution failure with the resource that produced it.
    pub fn in_resource(self, kind: &'static str, name: impl Into<String>) -> Self {
        CranError::ResourceFailed {
            kind,
            name: name.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for CranError {
    fn from(err: serde_json::Error) -> Self {
        CranError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CranError {
    fn from(err: serde_yaml::Error) -> Self {
        CranError::SerializationError(err.to_string())
    }
}

/// Result type alias for cranberry operations
pub type Result<T> = std::result::Result<T, CranError>;
