//! Registry credentials.

use std::sync::Arc;

use cranberry_core::error::{CranError, Result};

use super::Plan;
use crate::oci::RegistryAuth;
use crate::tools::RegistryLogin;

/// Basic-auth credentials scoped to one registry host.
#[derive(Clone, PartialEq, Eq)]
pub struct Registry {
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl Registry {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Credentials for a registry transport; anonymous without a username.
    pub fn auth(&self) -> RegistryAuth {
        RegistryAuth::from_parts(self.username.as_deref(), self.password.as_deref())
    }

    /// Credentials handed to an external tool.
    pub fn login(&self) -> Option<RegistryLogin> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(RegistryLogin {
                host: self.host.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub(crate) fn auth_for(registry: Option<&Arc<Registry>>) -> RegistryAuth {
    registry.map(|r| r.auth()).unwrap_or_default()
}

pub(crate) fn login_for(registry: Option<&Arc<Registry>>) -> Option<RegistryLogin> {
    registry.and_then(|r| r.login())
}

/// Builder for [`Registry`], created by [`Plan::registry`].
pub struct RegistryBuilder<'p> {
    plan: &'p mut Plan,
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl<'p> RegistryBuilder<'p> {
    pub(crate) fn new(plan: &'p mut Plan, host: String) -> Self {
        Self {
            plan,
            host,
            username: None,
            password: None,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn build(self) -> Result<Arc<Registry>> {
        let mut problems = Vec::new();
        if self.host.trim().is_empty() {
            problems.push("registry host is required".to_string());
        } else if self.host.contains(['/', ' ']) {
            problems.push("registry host must be a bare hostname".to_string());
        }
        if self.username.is_some() != self.password.is_some() {
            problems.push("username and password must be set together".to_string());
        }
        if !problems.is_empty() {
            return Err(CranError::Validation {
                kind: "registry",
                name: self.host,
                problems,
            });
        }

        let registry = Arc::new(Registry {
            host: self.host,
            username: self.username.filter(|u| !u.is_empty()),
            password: self.password,
        });
        let span = self.plan.span();
        tracing::debug!(parent: span, registry = %registry.host, "Registered registry");
        self.plan.registries.push(registry.clone());
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_with_credentials() {
        let mut plan = Plan::new("test");
        let registry = plan
            .registry("ghcr.io")
            .username("bot")
            .password("token")
            .build()
            .unwrap();
        assert_eq!(registry.auth(), RegistryAuth::basic("bot", "token"));
        let login = registry.login().unwrap();
        assert_eq!(login.host, "ghcr.io");
        assert!(!format!("{:?}", registry).contains("token"));
        assert_eq!(plan.registries().len(), 1);
    }

    #[test]
    fn test_anonymous_registry() {
        let mut plan = Plan::new("test");
        let registry = plan.registry("docker.io").build().unwrap();
        assert!(registry.auth().is_anonymous());
        assert!(registry.login().is_none());
        assert!(auth_for(None).is_anonymous());
    }

    #[test]
    fn test_registry_validation() {
        let mut plan = Plan::new("test");
        let err = plan.registry("").username("bot").build().unwrap_err();
        match err {
            CranError::Validation { problems, .. } => assert_eq!(
                problems,
                vec![
                    "registry host is required".to_string(),
                    "username and password must be set together".to_string(),
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert!(plan.registries().is_empty());
    }
}
