//! Remote multi-platform builds with `docker buildx` over SSH.

use std::path::PathBuf;

use async_trait::async_trait;
use cranberry_core::error::Result;
use cranberry_core::platform::Platform;

use super::{shell_quote, tool_error, Invocation, RegistryLogin};

/// A build to run on a remote node.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build resource name, used for the remote working directory.
    pub name: String,
    /// SSH target (host, `user@host` or ssh config alias).
    pub endpoint: String,
    /// Local build context directory.
    pub context: PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
    pub platforms: Vec<Platform>,
    /// Fully qualified tag the result is pushed to.
    pub tag: String,
    pub login: Option<RegistryLogin>,
}

#[async_trait]
pub trait RemoteBuilder: Send + Sync {
    /// Build for every platform and push the result on success.
    async fn build(&self, request: &BuildRequest) -> Result<()>;
}

/// Uploads the context with `scp` and runs `docker buildx build --push`
/// through `ssh`.
#[derive(Debug, Clone)]
pub struct SshBuildx {
    ssh: PathBuf,
    scp: PathBuf,
}

impl SshBuildx {
    pub fn new(ssh: impl Into<PathBuf>, scp: impl Into<PathBuf>) -> Self {
        Self {
            ssh: ssh.into(),
            scp: scp.into(),
        }
    }

    fn remote_dir(request: &BuildRequest) -> String {
        format!("/tmp/cranberry-build-{}", request.name)
    }

    async fn remote(&self, endpoint: &str, command: String) -> Result<()> {
        let output = Invocation::new("ssh", &self.ssh)
            .arg(endpoint)
            .arg(command.as_str())
            .output()
            .await?;
        if !output.success() {
            return Err(tool_error(
                "ssh",
                format!("'{}' on {} failed: {}", command, endpoint, output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn upload_context(&self, request: &BuildRequest) -> Result<()> {
        let remote_dir = Self::remote_dir(request);
        tracing::debug!(
            local = %request.context.display(),
            remote = %remote_dir,
            "Uploading build context"
        );
        self.remote(
            &request.endpoint,
            format!("mkdir -p {}", shell_quote(&remote_dir)),
        )
        .await?;

        let source = format!("{}/.", request.context.display());
        let output = Invocation::new("scp", &self.scp)
            .args(["-r", "-q", source.as_str()])
            .arg(format!("{}:{}", request.endpoint, remote_dir))
            .output()
            .await?;
        if !output.success() {
            return Err(tool_error(
                "scp",
                format!("Failed to upload build context: {}", output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn login(&self, endpoint: &str, login: &RegistryLogin) -> Result<()> {
        let output = Invocation::new("ssh", &self.ssh)
            .arg(endpoint)
            .arg(format!(
                "docker login {} --username {} --password-stdin",
                shell_quote(&login.host),
                shell_quote(&login.username)
            ))
            .stdin(login.password.clone())
            .output()
            .await?;
        if !output.success() {
            return Err(tool_error(
                "ssh",
                format!("Registry login to {} failed: {}", login.host, output.stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// The `docker buildx` command line run on the build node.
pub fn buildx_command(request: &BuildRequest, remote_dir: &str) -> String {
    let platforms = request
        .platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "docker buildx build --platform {} --push -t {} -f {} {}",
        platforms,
        shell_quote(&request.tag),
        shell_quote(&format!("{}/{}", remote_dir, request.dockerfile)),
        shell_quote(remote_dir)
    )
}

#[async_trait]
impl RemoteBuilder for SshBuildx {
    async fn build(&self, request: &BuildRequest) -> Result<()> {
        tracing::info!(
            endpoint = %request.endpoint,
            platforms = ?request.platforms,
            tag = %request.tag,
            "Starting multi-platform build"
        );

        self.upload_context(request).await?;
        if let Some(login) = &request.login {
            self.login(&request.endpoint, login).await?;
        }

        let command = buildx_command(request, &Self::remote_dir(request));
        let code = Invocation::new("ssh", &self.ssh)
            .arg(&request.endpoint)
            .arg(command)
            .stream()
            .await?;
        if code != Some(0) {
            return Err(tool_error(
                "buildx",
                format!("Build of {} failed with exit code {:?}", request.tag, code),
            ));
        }

        tracing::info!(tag = %request.tag, "Multi-platform build complete");
        Ok(())
    }
}
