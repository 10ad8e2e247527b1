//! Collaborators and cancellation shared by every resource of a run.

use std::sync::Arc;

use cranberry_core::config::Settings;
use cranberry_core::error::{CranError, Result};
use tokio_util::sync::CancellationToken;

use crate::oci::{OciConnector, RegistryConnector};
use crate::tools::{
    Dockle, DockerfileLinter, Hadolint, ImageLinter, RemoteBuilder, Scanner, SshBuildx,
    TrivyScanner,
};

/// Everything a plan needs to talk to the outside world.
#[derive(Clone)]
pub struct ExecutionContext {
    connector: Arc<dyn RegistryConnector>,
    scanner: Arc<dyn Scanner>,
    dockerfile_linter: Arc<dyn DockerfileLinter>,
    image_linter: Arc<dyn ImageLinter>,
    builder: Arc<dyn RemoteBuilder>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Context backed by real registries and the configured tool binaries.
    pub fn from_settings(settings: &Settings) -> Self {
        let tools = &settings.tools;
        Self {
            connector: Arc::new(OciConnector::new(settings.registry.insecure.clone())),
            scanner: Arc::new(TrivyScanner::new(tools.trivy.clone())),
            dockerfile_linter: Arc::new(Hadolint::new(tools.hadolint.clone())),
            image_linter: Arc::new(Dockle::new(tools.dockle.clone())),
            builder: Arc::new(SshBuildx::new(tools.ssh.clone(), tools.scp.clone())),
            cancel: CancellationToken::new(),
        }
    }

    /// Context with a custom registry connector and default tools.
    pub fn new(connector: Arc<dyn RegistryConnector>) -> Self {
        Self {
            connector,
            ..Self::from_settings(&Settings::default())
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_dockerfile_linter(mut self, linter: Arc<dyn DockerfileLinter>) -> Self {
        self.dockerfile_linter = linter;
        self
    }

    pub fn with_image_linter(mut self, linter: Arc<dyn ImageLinter>) -> Self {
        self.image_linter = linter;
        self
    }

    pub fn with_remote_builder(mut self, builder: Arc<dyn RemoteBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Share a cancellation token with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn connector(&self) -> &dyn RegistryConnector {
        self.connector.as_ref()
    }

    pub(crate) fn scanner(&self) -> &dyn Scanner {
        self.scanner.as_ref()
    }

    pub(crate) fn dockerfile_linter(&self) -> &dyn DockerfileLinter {
        self.dockerfile_linter.as_ref()
    }

    pub(crate) fn image_linter(&self) -> &dyn ImageLinter {
        self.image_linter.as_ref()
    }

    pub(crate) fn remote_builder(&self) -> &dyn RemoteBuilder {
        self.builder.as_ref()
    }

    /// Fail with `Cancelled` when the token has fired. `next` names what
    /// would have run.
    pub(crate) fn ensure_active(&self, next: impl FnOnce() -> String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CranError::Cancelled(next()));
        }
        Ok(())
    }
}
