//! Multi-platform builds on remote nodes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;

use super::build_node::BuildNode;
use super::context::ExecutionContext;
use super::registry::Registry;
use super::stage::{Resource, StageKind};
use super::Plan;
use crate::tools::BuildRequest;

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Builds a context for every node's platform and pushes the result.
///
/// The build runs on the first node; the remaining nodes contribute their
/// platforms through the builder configured there.
#[derive(Debug)]
pub struct Build {
    name: String,
    context: PathBuf,
    dockerfile: String,
    nodes: Vec<Arc<BuildNode>>,
    registry: Arc<Registry>,
    tag: String,
    span: tracing::Span,
}

impl Build {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn dockerfile(&self) -> &str {
        &self.dockerfile
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.nodes.iter().map(|n| n.platform()).collect()
    }

    fn request(&self) -> Result<BuildRequest> {
        let first = self.nodes.first().ok_or_else(|| CranError::Validation {
            kind: "build",
            name: self.name.clone(),
            problems: vec!["no build nodes configured".to_string()],
        })?;
        Ok(BuildRequest {
            name: self.name.clone(),
            endpoint: first.endpoint().to_string(),
            context: self.context.clone(),
            dockerfile: self.dockerfile.clone(),
            platforms: self.platforms(),
            tag: self.tag.clone(),
            login: self.registry.login(),
        })
    }
}

#[async_trait]
impl Resource for Build {
    fn kind(&self) -> &'static str {
        "build"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn span(&self) -> &tracing::Span {
        &self.span
    }

    fn describe(&self) -> String {
        let nodes: Vec<_> = self.nodes.iter().map(|n| n.name()).collect();
        format!(
            "build {} ({}) on [{}] and push {}",
            self.context.display(),
            self.dockerfile,
            nodes.join(", "),
            self.tag
        )
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<()> {
        let request = self.request()?;
        tracing::info!(context = %self.context.display(), tag = %self.tag, "Building image");
        ctx.remote_builder().build(&request).await?;
        tracing::info!(tag = %self.tag, "Build complete");
        Ok(())
    }
}

/// Builder for [`Build`], created by [`Plan::build`].
pub struct BuildBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    context: Option<PathBuf>,
    dockerfile: Option<String>,
    nodes: Vec<Arc<BuildNode>>,
    registry: Option<Arc<Registry>>,
    tag: Option<String>,
}

impl<'p> BuildBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            context: None,
            dockerfile: None,
            nodes: Vec::new(),
            registry: None,
            tag: None,
        }
    }

    /// Local build context directory.
    pub fn context(mut self, context: impl Into<PathBuf>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Dockerfile path relative to the context. Defaults to `Dockerfile`.
    pub fn dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }

    pub fn node(mut self, node: Arc<BuildNode>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Registry the built image is pushed to.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Fully qualified tag of the result.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn build(self) -> Result<Arc<Build>> {
        let mut problems = Vec::new();
        // Names a directory on the build node, passed through ssh and scp
        if self.name.is_empty() || !self.name.chars().all(is_name_char) {
            problems.push(format!(
                "build name '{}' may only contain letters, digits, '.', '_' and '-'",
                self.name
            ));
        }
        let context = self.context.filter(|c| !c.as_os_str().is_empty());
        if context.is_none() {
            problems.push("build context is required".to_string());
        }
        if self.nodes.is_empty() {
            problems.push("at least one build node is required".to_string());
        }
        let mut seen = Vec::new();
        for node in &self.nodes {
            if seen.contains(&node.platform()) {
                problems.push(format!(
                    "more than one build node for platform {}",
                    node.platform()
                ));
            }
            seen.push(node.platform());
        }
        if self.registry.is_none() {
            problems.push("build registry is required".to_string());
        }
        let tag = self.tag.filter(|t| !t.trim().is_empty());
        if tag.is_none() {
            problems.push("build tag is required".to_string());
        }

        let (Some(context), Some(registry), Some(tag), true) =
            (context, self.registry, tag, problems.is_empty())
        else {
            return Err(CranError::Validation {
                kind: "build",
                name: self.name,
                problems,
            });
        };

        let build = Arc::new(Build {
            span: tracing::info_span!(parent: self.plan.span(), "build", build = %self.name),
            name: self.name,
            context,
            dockerfile: self
                .dockerfile
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
            nodes: self.nodes,
            registry,
            tag,
        });
        self.plan.pipeline.push(StageKind::Builds, build.clone());
        Ok(build)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::MemoryRegistry;
    use crate::tools::RemoteBuilder;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingBuilder {
        requests: Mutex<Vec<BuildRequest>>,
    }

    #[async_trait]
    impl RemoteBuilder for RecordingBuilder {
        async fn build(&self, request: &BuildRequest) -> Result<()> {
            self.requests.lock().push(request.clone());
            Ok(())
        }
    }

    fn nodes(plan: &mut Plan) -> (Arc<BuildNode>, Arc<BuildNode>) {
        let amd = plan
            .build_node("amd64-builder")
            .endpoint("builder@10.0.0.5")
            .platform(Platform::LinuxAmd64)
            .build()
            .unwrap();
        let arm = plan
            .build_node("arm64-builder")
            .endpoint("builder@10.0.0.6")
            .platform(Platform::LinuxArm64)
            .build()
            .unwrap();
        (amd, arm)
    }

    #[tokio::test]
    async fn test_build_uses_first_node_and_all_platforms() {
        let mut plan = Plan::new("test");
        let ghcr = plan
            .registry("ghcr.io")
            .username("bot")
            .password("token")
            .build()
            .unwrap();
        let (amd, arm) = nodes(&mut plan);
        let build = plan
            .build("app")
            .context("./docker/app")
            .node(amd)
            .node(arm)
            .registry(ghcr)
            .tag("ghcr.io/org/app:v1")
            .build()
            .unwrap();
        assert_eq!(build.dockerfile(), "Dockerfile");

        let recorder = Arc::new(RecordingBuilder::default());
        let ctx = ExecutionContext::new(Arc::new(MemoryRegistry::new()))
            .with_remote_builder(recorder.clone());
        build.execute(&ctx).await.unwrap();

        let requests = recorder.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].endpoint, "builder@10.0.0.5");
        assert_eq!(
            requests[0].platforms,
            vec![Platform::LinuxAmd64, Platform::LinuxArm64]
        );
        assert_eq!(requests[0].login.as_ref().unwrap().username, "bot");
    }

    #[test]
    fn test_build_validation() {
        let mut plan = Plan::new("test");
        let err = plan.build("app").dockerfile("Dockerfile.prod").build().unwrap_err();
        match err {
            CranError::Validation { problems, .. } => assert_eq!(
                problems,
                vec![
                    "build context is required".to_string(),
                    "at least one build node is required".to_string(),
                    "build registry is required".to_string(),
                    "build tag is required".to_string(),
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_platform_rejected() {
        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let (amd, _) = nodes(&mut plan);
        let err = plan
            .build("app")
            .context(".")
            .node(amd.clone())
            .node(amd)
            .registry(ghcr)
            .tag("ghcr.io/org/app:v1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("more than one build node for platform linux/amd64"));
    }

    #[test]
    fn test_build_name_must_be_path_safe() {
        let mut plan = Plan::new("test");
        let ghcr = plan.registry("ghcr.io").build().unwrap();
        let (amd, _) = nodes(&mut plan);
        for name in ["my app", "app;rm -rf ~", "app$(id)", ""] {
            let err = plan
                .build(name)
                .context(".")
                .node(amd.clone())
                .registry(ghcr.clone())
                .tag("ghcr.io/org/app:v1")
                .build()
                .unwrap_err();
            assert!(err.to_string().contains("may only contain letters"), "{name}");
        }
        assert!(plan
            .build("app_v1.2-amd64")
            .context(".")
            .node(amd)
            .registry(ghcr)
            .tag("ghcr.io/org/app:v1")
            .build()
            .is_ok());
    }
}
