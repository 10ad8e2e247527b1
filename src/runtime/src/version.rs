//! Release version discovery for image repositories.
//!
//! Lists a repository's tags, keeps release-looking ones that share the
//! current version's variant, and orders them numerically.

use std::cmp::Ordering;

use cranberry_core::error::{CranError, Result};
use regex::Regex;

use crate::oci::{ImageReference, RegistryClient};

/// Substrings that mark a tag as a development build.
const EXCLUDED_TAG_PATTERNS: [&str; 8] = [
    "nightly", "dev", "beta", "alpha", "rc", "test", "snapshot", "builder",
];

/// Outcome of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: String,
    /// Empty when the latest tag's digest could not be resolved.
    pub latest_digest: String,
    pub update_available: bool,
}

/// Checks a repository for newer release tags.
pub struct VersionChecker {
    client: RegistryClient,
}

impl VersionChecker {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Find the latest release of `image` comparable to `current_version`.
    ///
    /// When `variant` is `None` it is derived from `current_version`
    /// (`0.50.0-distroless-static` → `distroless-static`).
    pub async fn check_version(
        &self,
        image: &ImageReference,
        current_version: &str,
        variant: Option<&str>,
    ) -> Result<VersionInfo> {
        let variant = match variant {
            Some(v) => v.to_string(),
            None => extract_variant(current_version).1,
        };

        tracing::debug!(
            image = %image.repository_reference(),
            current = current_version,
            variant = %variant,
            "Checking registry for updates"
        );

        let filter = VersionFilter::new(&variant)?;
        let tags = self.client.list_tags(image).await?;
        let mut versions: Vec<(String, Option<String>)> = Vec::new();
        for tag in tags.into_iter().filter(|t| filter.matches(t)) {
            let digest = match self.client.get_digest(&image.with_tag(&tag)).await {
                Ok(digest) => Some(digest),
                Err(e) => {
                    tracing::debug!(tag = %tag, error = %e, "Skipping digest lookup failure");
                    None
                }
            };
            versions.push((tag, digest));
        }

        if versions.is_empty() {
            return Err(CranError::NoValidVersions(image.repository_reference()));
        }

        versions.sort_by(|a, b| compare_versions(&a.0, &b.0));
        let (latest_version, latest_digest) = versions
            .pop()
            .ok_or_else(|| CranError::NoValidVersions(image.repository_reference()))?;

        let info = VersionInfo {
            current_version: current_version.to_string(),
            update_available: current_version != latest_version,
            latest_version,
            latest_digest: latest_digest.unwrap_or_default(),
        };

        if info.update_available {
            tracing::info!(
                image = %image.repository_reference(),
                current = %info.current_version,
                latest = %info.latest_version,
                "Update available"
            );
        } else {
            tracing::debug!(
                image = %image.repository_reference(),
                version = %info.current_version,
                "Up to date"
            );
        }

        Ok(info)
    }

    /// Current digest of a tag reference.
    pub async fn get_tag_digest(&self, reference: &ImageReference) -> Result<String> {
        self.client.get_digest(reference).await
    }
}

/// Split `v0.50.0-distroless-static` into (`0.50.0`, `distroless-static`).
pub fn extract_variant(full_version: &str) -> (String, String) {
    let trimmed = full_version.strip_prefix('v').unwrap_or(full_version);
    match trimmed.split_once('-') {
        Some((version, variant)) => (version.to_string(), variant.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

/// Accepts release tags carrying exactly one variant (no suffix at all
/// when the variant is empty).
#[derive(Debug, Clone)]
pub struct VersionFilter {
    pattern: Regex,
}

impl VersionFilter {
    pub fn new(variant: &str) -> Result<Self> {
        let pattern = if variant.is_empty() {
            r"^v?[0-9]+\.[0-9]+[0-9.]*$".to_string()
        } else {
            format!(r"^v?[0-9]+\.[0-9]+[0-9.]*-{}$", regex::escape(variant))
        };
        let pattern = Regex::new(&pattern).map_err(|e| {
            CranError::ConfigError(format!("Invalid version variant '{}': {}", variant, e))
        })?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, tag: &str) -> bool {
        let lower = tag.to_lowercase();
        if EXCLUDED_TAG_PATTERNS.iter().any(|p| lower.contains(p)) {
            return false;
        }
        self.pattern.is_match(tag)
    }
}

/// Compare two versions component by component as integers.
///
/// A leading `v` and any `-variant` suffix are ignored; missing components
/// count as zero, so `1.10.0 > 1.9.0` and `1.2 == 1.2.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = numeric_parts(a);
    let b = numeric_parts(b);
    let len = a.len().max(b.len());
    for idx in 0..len {
        let x = a.get(idx).copied().unwrap_or(0);
        let y = b.get(idx).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn numeric_parts(version: &str) -> Vec<u64> {
    let (version, _) = extract_variant(version);
    version
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}
