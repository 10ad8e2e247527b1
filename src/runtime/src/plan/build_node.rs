//! Remote build nodes.

use std::sync::Arc;

use cranberry_core::error::{CranError, Result};
use cranberry_core::platform::Platform;

use super::Plan;

/// A builder reachable over SSH, bound to one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
    name: String,
    endpoint: String,
    platform: Platform,
}

impl BuildNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SSH target: host, `user@host` or an ssh config alias.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

/// Builder for [`BuildNode`], created by [`Plan::build_node`].
pub struct BuildNodeBuilder<'p> {
    plan: &'p mut Plan,
    name: String,
    endpoint: Option<String>,
    platform: Option<Platform>,
}

impl<'p> BuildNodeBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, name: String) -> Self {
        Self {
            plan,
            name,
            endpoint: None,
            platform: None,
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn build(self) -> Result<Arc<BuildNode>> {
        let mut problems = Vec::new();
        let endpoint = self.endpoint.filter(|e| !e.trim().is_empty());
        if endpoint.is_none() {
            problems.push("build node endpoint is required".to_string());
        }
        if self.platform.is_none() {
            problems.push("build node platform is required".to_string());
        }
        let (Some(endpoint), Some(platform)) = (endpoint, self.platform) else {
            return Err(CranError::Validation {
                kind: "build node",
                name: self.name,
                problems,
            });
        };

        let node = Arc::new(BuildNode {
            name: self.name,
            endpoint,
            platform,
        });
        let span = self.plan.span();
        tracing::debug!(
            parent: span,
            buildnode = %node.name,
            platform = %node.platform,
            "Registered build node"
        );
        self.plan.build_nodes.push(node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_node() {
        let mut plan = Plan::new("test");
        let node = plan
            .build_node("arm64-builder")
            .endpoint("builder@10.0.0.6")
            .platform(Platform::LinuxArm64)
            .build()
            .unwrap();
        assert_eq!(node.endpoint(), "builder@10.0.0.6");
        assert_eq!(node.platform(), Platform::LinuxArm64);
        assert_eq!(plan.build_nodes().len(), 1);
    }

    #[test]
    fn test_build_node_requires_endpoint_and_platform() {
        let mut plan = Plan::new("test");
        let err = plan.build_node("amd64-builder").endpoint(" ").build().unwrap_err();
        match err {
            CranError::Validation { kind, problems, .. } => {
                assert_eq!(kind, "build node");
                assert_eq!(problems.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(plan.build_nodes().is_empty());
    }
}
