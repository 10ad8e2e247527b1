//! YAML plan files.
//!
//! A plan file declares registries, images and build nodes by key, then
//! lists the operations that use them:
//!
//! ```yaml
//! name: mirror
//! registries:
//!   ghcr:
//!     host: ghcr.io
//!     username: ${GHCR_USER}
//!     password: ${GHCR_TOKEN}
//! images:
//!   vector-upstream:
//!     name: timberio/vector
//!     version: 0.50.0-distroless-static
//!     digest: sha256:...
//!   vector:
//!     name: ghcr.io/org/vector
//!     version: 0.50.0-distroless-static
//! syncs:
//!   - name: vector
//!     source: vector-upstream
//!     destination: vector
//!     registry: ghcr
//! scans:
//!   - name: vector-scan
//!     image: vector
//!     registry: ghcr
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are substituted from the environment
//! inside string values after parsing, so substituted text is never read
//! as YAML. Comments are not expanded.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;
use regex::Regex;
use serde::Deserialize;

use super::audit::RuleSet;
use super::build_node::BuildNode;
use super::image::Image;
use super::registry::Registry;
use super::scan::{Action, Format};
use super::Plan;
use crate::tools::Severity;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    name: String,
    #[serde(default)]
    registries: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    images: BTreeMap<String, ImageEntry>,
    #[serde(default)]
    build_nodes: BTreeMap<String, BuildNodeEntry>,
    #[serde(default)]
    version_checks: Vec<VersionCheckEntry>,
    #[serde(default)]
    syncs: Vec<SyncEntry>,
    #[serde(default)]
    scans: Vec<ScanEntry>,
    #[serde(default)]
    builds: Vec<BuildEntry>,
    #[serde(default)]
    audits: Vec<AuditEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryEntry {
    host: String,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageEntry {
    name: String,
    version: Option<String>,
    digest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildNodeEntry {
    endpoint: Option<String>,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VersionCheckEntry {
    name: String,
    image: String,
    registry: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncEntry {
    name: String,
    source: String,
    source_registry: Option<String>,
    verified_by: Option<String>,
    destination: String,
    registry: String,
    #[serde(default)]
    platforms: Vec<Platform>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeverityEntry {
    threshold: Severity,
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScanEntry {
    name: String,
    image: String,
    registry: Option<String>,
    #[serde(default)]
    severity: Vec<SeverityEntry>,
    format: Option<Format>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildEntry {
    name: String,
    context: PathBuf,
    dockerfile: Option<String>,
    nodes: Vec<String>,
    registry: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuditEntry {
    name: String,
    dockerfile: Option<PathBuf>,
    image: Option<String>,
    registry: Option<String>,
    ruleset: Option<RuleSet>,
    #[serde(default)]
    ignore: Vec<String>,
}

/// Load a plan file from disk.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        CranError::ConfigError(format!("Failed to read plan {}: {}", path.display(), e))
    })?;
    tracing::debug!(path = %path.display(), "Loading plan file");
    from_yaml(&data)
}

/// Parse a plan from YAML text, expanding variables from the environment.
pub fn from_yaml(data: &str) -> Result<Plan> {
    from_yaml_with(data, |name| std::env::var(name).ok())
}

/// Parse a plan from YAML text, resolving variables through `lookup`.
pub fn from_yaml_with<F>(data: &str, lookup: F) -> Result<Plan>
where
    F: Fn(&str) -> Option<String>,
{
    let mut document: serde_yaml::Value = serde_yaml::from_str(data)?;
    let mut expander = Expander::new(&lookup)?;
    expander.expand_value(&mut document);
    expander.finish()?;
    let file: PlanFile = serde_yaml::from_value(document)?;
    Loader::new(&file.name).load(&file)
}

const VAR_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

/// Substitute `${VAR}` and `${VAR:-default}`. Every unset variable without
/// a default is reported.
pub fn expand_vars<F>(data: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expander = Expander::new(&lookup)?;
    let expanded = expander.expand_str(data);
    expander.finish()?;
    Ok(expanded)
}

/// Expands variables across many strings, remembering unset names.
struct Expander<'a> {
    pattern: Regex,
    lookup: &'a dyn Fn(&str) -> Option<String>,
    missing: Vec<String>,
}

impl<'a> Expander<'a> {
    fn new(lookup: &'a dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let pattern = Regex::new(VAR_PATTERN)
            .map_err(|e| CranError::ConfigError(format!("Invalid variable pattern: {}", e)))?;
        Ok(Self {
            pattern,
            lookup,
            missing: Vec::new(),
        })
    }

    fn expand_str(&mut self, text: &str) -> String {
        let lookup = self.lookup;
        let missing = &mut self.missing;
        self.pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match (lookup(name), caps.get(2)) {
                    (Some(value), _) => value,
                    (None, Some(default)) => default.as_str().to_string(),
                    (None, None) => {
                        if !missing.iter().any(|m| m == name) {
                            missing.push(name.to_string());
                        }
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    /// Expand every string scalar below `value`. Keys are left alone.
    fn expand_value(&mut self, value: &mut serde_yaml::Value) {
        match value {
            serde_yaml::Value::String(text) => {
                if self.pattern.is_match(text) {
                    *text = self.expand_str(text);
                }
            }
            serde_yaml::Value::Sequence(items) => {
                for item in items {
                    self.expand_value(item);
                }
            }
            serde_yaml::Value::Mapping(map) => {
                for (_, item) in map.iter_mut() {
                    self.expand_value(item);
                }
            }
            serde_yaml::Value::Tagged(tagged) => self.expand_value(&mut tagged.value),
            _ => {}
        }
    }

    fn finish(self) -> Result<()> {
        if self.missing.is_empty() {
            return Ok(());
        }
        Err(CranError::ConfigError(format!(
            "Unset variables in plan: {}",
            self.missing.join(", ")
        )))
    }
}

/// Registers plan file entries through the builders, collecting every error.
struct Loader {
    plan: Plan,
    registries: HashMap<String, Arc<Registry>>,
    images: HashMap<String, Arc<Image>>,
    nodes: HashMap<String, Arc<BuildNode>>,
    errors: Vec<String>,
}

impl Loader {
    fn new(name: &str) -> Self {
        Self {
            plan: Plan::new(name),
            registries: HashMap::new(),
            images: HashMap::new(),
            nodes: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn load(mut self, file: &PlanFile) -> Result<Plan> {
        for (key, entry) in &file.registries {
            let mut builder = self.plan.registry(&entry.host);
            if let Some(username) = &entry.username {
                builder = builder.username(username);
            }
            if let Some(password) = &entry.password {
                builder = builder.password(password);
            }
            match builder.build() {
                Ok(registry) => {
                    self.registries.insert(key.clone(), registry);
                }
                Err(e) => self.errors.push(e.to_string()),
            }
        }

        for (key, entry) in &file.images {
            let mut builder = Image::builder(&entry.name);
            if let Some(version) = &entry.version {
                builder = builder.version(version);
            }
            if let Some(digest) = &entry.digest {
                builder = builder.digest(digest);
            }
            match builder.build() {
                Ok(image) => {
                    self.images.insert(key.clone(), image);
                }
                Err(e) => self.errors.push(format!("image '{}': {}", key, e)),
            }
        }

        for (key, entry) in &file.build_nodes {
            let mut builder = self.plan.build_node(key);
            if let Some(endpoint) = &entry.endpoint {
                builder = builder.endpoint(endpoint);
            }
            if let Some(platform) = entry.platform {
                builder = builder.platform(platform);
            }
            match builder.build() {
                Ok(node) => {
                    self.nodes.insert(key.clone(), node);
                }
                Err(e) => self.errors.push(e.to_string()),
            }
        }

        for entry in &file.version_checks {
            self.version_check(entry);
        }
        // Syncs register before scans so a scan sees its image's producer.
        let scan_names: Vec<&str> = file.scans.iter().map(|s| s.name.as_str()).collect();
        for entry in &file.syncs {
            self.sync(entry, &scan_names);
        }
        for entry in &file.scans {
            self.scan(entry);
        }
        for entry in &file.builds {
            self.build(entry);
        }
        for entry in &file.audits {
            self.audit(entry);
        }

        if !self.errors.is_empty() {
            return Err(CranError::ConfigError(format!(
                "plan '{}' has {} invalid entries:\n  {}",
                self.plan.name(),
                self.errors.len(),
                self.errors.join("\n  ")
            )));
        }
        tracing::debug!(
            plan = %self.plan.name(),
            resources = self.plan.pipeline().len(),
            "Plan file loaded"
        );
        Ok(self.plan)
    }

    fn lookup<T: Clone>(
        map: &HashMap<String, T>,
        what: &str,
        key: &str,
        owner: &str,
        errors: &mut Vec<String>,
    ) -> Option<T> {
        let found = map.get(key).cloned();
        if found.is_none() {
            errors.push(format!("{}: unknown {} '{}'", owner, what, key));
        }
        found
    }

    fn registry(&mut self, key: &str, owner: &str) -> Option<Arc<Registry>> {
        Self::lookup(&self.registries, "registry", key, owner, &mut self.errors)
    }

    fn optional_registry(&mut self, key: Option<&String>, owner: &str) -> Option<Arc<Registry>> {
        key.and_then(|key| self.registry(key, owner))
    }

    fn image(&mut self, key: &str, owner: &str) -> Option<Arc<Image>> {
        Self::lookup(&self.images, "image", key, owner, &mut self.errors)
    }

    fn version_check(&mut self, entry: &VersionCheckEntry) {
        let owner = format!("version check '{}'", entry.name);
        let image = self.image(&entry.image, &owner);
        let registry = self.optional_registry(entry.registry.as_ref(), &owner);
        let Some(image) = image else { return };

        let mut builder = self.plan.version_check(&entry.name).source(image);
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        if let Err(e) = builder.build() {
            self.errors.push(e.to_string());
        }
    }

    fn sync(&mut self, entry: &SyncEntry, scan_names: &[&str]) {
        let owner = format!("sync '{}'", entry.name);
        let source = self.image(&entry.source, &owner);
        let destination = self.image(&entry.destination, &owner);
        let registry = self.registry(&entry.registry, &owner);
        let source_registry = self.optional_registry(entry.source_registry.as_ref(), &owner);
        if let Some(scan) = &entry.verified_by {
            if !scan_names.contains(&scan.as_str()) {
                self.errors.push(format!("{}: unknown scan '{}'", owner, scan));
            }
        }
        let (Some(source), Some(destination), Some(registry)) = (source, destination, registry)
        else {
            return;
        };

        let mut builder = self
            .plan
            .sync(&entry.name)
            .source(source)
            .destination(destination, registry);
        if let Some(registry) = source_registry {
            builder = builder.source_registry(registry);
        }
        if let Some(scan) = &entry.verified_by {
            builder = builder.verified_by(scan);
        }
        if !entry.platforms.is_empty() {
            builder = builder.platforms(&entry.platforms);
        }
        if let Err(e) = builder.build() {
            self.errors.push(e.to_string());
        }
    }

    fn scan(&mut self, entry: &ScanEntry) {
        let owner = format!("scan '{}'", entry.name);
        let image = self.image(&entry.image, &owner);
        let registry = self.optional_registry(entry.registry.as_ref(), &owner);
        let Some(image) = image else { return };

        let mut builder = self.plan.scan(&entry.name).source(image);
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        for check in &entry.severity {
            builder = builder.severity(check.threshold, check.action);
        }
        if let Some(format) = entry.format {
            builder = builder.format(format);
        }
        if let Err(e) = builder.build() {
            self.errors.push(e.to_string());
        }
    }

    fn build(&mut self, entry: &BuildEntry) {
        let owner = format!("build '{}'", entry.name);
        let registry = self.registry(&entry.registry, &owner);
        let mut nodes = Vec::with_capacity(entry.nodes.len());
        for key in &entry.nodes {
            if let Some(node) = Self::lookup(&self.nodes, "build node", key, &owner, &mut self.errors)
            {
                nodes.push(node);
            }
        }
        if nodes.len() != entry.nodes.len() {
            return;
        }
        let Some(registry) = registry else { return };

        let mut builder = self
            .plan
            .build(&entry.name)
            .context(&entry.context)
            .registry(registry)
            .tag(&entry.tag);
        if let Some(dockerfile) = &entry.dockerfile {
            builder = builder.dockerfile(dockerfile);
        }
        for node in nodes {
            builder = builder.node(node);
        }
        if let Err(e) = builder.build() {
            self.errors.push(e.to_string());
        }
    }

    fn audit(&mut self, entry: &AuditEntry) {
        let owner = format!("audit '{}'", entry.name);
        let image = match &entry.image {
            Some(key) => match self.image(key, &owner) {
                Some(image) => Some(image),
                None => return,
            },
            None => None,
        };
        let registry = self.optional_registry(entry.registry.as_ref(), &owner);

        let mut builder = self
            .plan
            .audit(&entry.name)
            .ignore_checks(entry.ignore.iter().cloned());
        if let Some(dockerfile) = &entry.dockerfile {
            builder = builder.dockerfile(dockerfile);
        }
        if let Some(image) = image {
            builder = builder.source(image);
        }
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        if let Some(rule_set) = entry.ruleset {
            builder = builder.rule_set(rule_set);
        }
        if let Err(e) = builder.build() {
            self.errors.push(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StageKind;
    use std::io::Write;

    const DIGEST: &str = "sha256:6666666666666666666666666666666666666666666666666666666666666666";

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    fn mirror_plan() -> String {
        format!(
            r#"
name: mirror
registries:
  ghcr:
    host: ghcr.io
    username: ${{GHCR_USER}}
    password: ${{GHCR_TOKEN}}
images:
  vector-upstream:
    name: timberio/vector
    version: 0.50.0-distroless-static
    digest: {DIGEST}
  vector:
    name: ghcr.io/org/vector
    version: ${{VECTOR_TAG:-0.50.0}}
build_nodes:
  amd64:
    endpoint: builder@10.0.0.5
    platform: linux/amd64
version_checks:
  - name: vector-upstream
    image: vector-upstream
scans:
  - name: vector-scan
    image: vector
    registry: ghcr
    severity:
      - threshold: CRITICAL
        action: error
      - threshold: MEDIUM
        action: warn
    format: json
syncs:
  - name: vector
    source: vector-upstream
    verified_by: vector-scan
    destination: vector
    registry: ghcr
    platforms: [linux/amd64]
builds:
  - name: app
    context: ./docker/app
    nodes: [amd64]
    registry: ghcr
    tag: ghcr.io/org/app:v1
audits:
  - name: app-audit
    dockerfile: ./docker/app/Dockerfile
    ruleset: recommended
"#
        )
    }

    #[test]
    fn test_expand_vars() {
        let lookup = env(&[("USER", "bot")]);
        assert_eq!(
            expand_vars("u=${USER} t=${TAG:-latest}", &lookup).unwrap(),
            "u=bot t=latest"
        );
        let err = expand_vars("${A} ${B} ${A}", &lookup).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Unset variables in plan: A, B");
    }

    #[test]
    fn test_load_full_plan() {
        let plan = from_yaml_with(
            &mirror_plan(),
            env(&[("GHCR_USER", "bot"), ("GHCR_TOKEN", "secret")]),
        )
        .unwrap();

        assert_eq!(plan.name(), "mirror");
        assert_eq!(plan.registries()[0].username(), Some("bot"));
        assert_eq!(plan.build_nodes().len(), 1);
        assert_eq!(plan.pipeline().len(), 5);

        let actions = plan.dry_run();
        let kinds: Vec<_> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec!["version check", "sync", "build", "scan", "audit"]);
        assert!(actions[1].summary.contains("ghcr.io/org/vector:0.50.0 [linux/amd64]"));
    }

    #[test]
    fn test_scan_and_sync_share_image() {
        let plan = from_yaml_with(
            &mirror_plan(),
            env(&[("GHCR_USER", "bot"), ("GHCR_TOKEN", "secret")]),
        )
        .unwrap();
        let syncs = plan.pipeline().stage(StageKind::Syncs);
        let scans = plan.pipeline().stage(StageKind::Scans);
        assert_eq!(syncs.resources().len(), 1);
        assert_eq!(scans.resources().len(), 1);
        assert!(scans.resources()[0]
            .describe()
            .contains("ghcr.io/org/vector (digest from sync 'vector')"));
    }

    #[test]
    fn test_errors_are_collected() {
        let yaml = r#"
name: broken
registries:
  ghcr:
    host: https://ghcr.io
images:
  tagged:
    name: timberio/vector
    version: "0.50.0"
syncs:
  - name: vector
    source: tagged
    destination: missing
    registry: ghcr
  - name: unpinned
    source: tagged
    destination: tagged
    registry: quay
builds:
  - name: app
    context: .
    nodes: [nowhere]
    registry: ghcr
    tag: ghcr.io/org/app:v1
"#;
        let err = from_yaml_with(yaml, env(&[])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Invalid registry 'https://ghcr.io'"));
        assert!(message.contains("sync 'vector': unknown image 'missing'"));
        assert!(message.contains("sync 'unpinned': unknown registry 'quay'"));
        assert!(message.contains("build 'app': unknown build node 'nowhere'"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = from_yaml_with("name: x\nsyncz: []\n", env(&[])).unwrap_err();
        assert!(matches!(err, CranError::SerializationError(_)));
    }

    #[test]
    fn test_load_plan_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: audit-only").unwrap();
        writeln!(file, "audits:").unwrap();
        writeln!(file, "  - name: df").unwrap();
        writeln!(file, "    dockerfile: Dockerfile").unwrap();

        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.name(), "audit-only");
        assert_eq!(plan.pipeline().stage(StageKind::Audits).resources().len(), 1);

        let err = load_plan(Path::new("/nonexistent/plan.yaml")).unwrap_err();
        assert!(matches!(err, CranError::ConfigError(_)));
    }

    #[test]
    fn test_variables_expand_as_plain_text() {
        let yaml = r#"
name: secrets
# token comes from ${NOT_SET_ANYWHERE}
registries:
  ghcr:
    host: ghcr.io
    username: ${GHCR_USER}
    password: ${GHCR_TOKEN}
audits:
  - name: df
    dockerfile: Dockerfile
"#;
        let plan = from_yaml_with(
            yaml,
            env(&[("GHCR_USER", "[bot]"), ("GHCR_TOKEN", "abc #def: *ghi")]),
        )
        .unwrap();
        let registry = &plan.registries()[0];
        assert_eq!(registry.username(), Some("[bot]"));
        assert_eq!(registry.auth().password(), Some("abc #def: *ghi"));
    }

    #[test]
    fn test_unset_variables_reported_across_document() {
        let yaml = "name: ${PLAN}\nregistries:\n  r:\n    host: ${HOST}\n";
        let err = from_yaml_with(yaml, env(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Unset variables in plan: PLAN, HOST"
        );
    }
}
