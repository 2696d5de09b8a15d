//! Container daemon client abstraction
//!
//! The orchestrator treats the container daemon as an opaque RPC peer: volume
//! lifecycle, image builds, and the phase-container lifecycle
//! (create/start/wait/logs/remove, copy-to/copy-from). [`CliContainerDaemon`]
//! implements this by shelling out to the `docker` binary, mirroring the
//! invocation style used elsewhere in this crate for CLI-based integrations.

use crate::errors::{DockerError, OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use tracing::{debug, instrument};

/// Arguments for a single daemon-side image build (§6).
#[derive(Debug, Clone)]
pub struct ImageBuildOptions {
    pub dockerfile: String,
    pub tags: Vec<String>,
    pub remove: bool,
    pub build_args: HashMap<String, String>,
}

/// The subset of `docker inspect` state the orchestrator needs from an image.
#[derive(Debug, Clone, Default)]
pub struct ImageInspect {
    pub id: String,
    pub digest: Option<String>,
    /// Image labels, including `io.buildpacks.builder.metadata` when the
    /// image is a builder (used by [`crate::extensions::builder_declares_extensions`]).
    pub labels: HashMap<String, String>,
    /// Uncompressed layer diff-ids, bottom to top (`.RootFS.Layers`). Used to
    /// find the layers added above a prior top-layer hash.
    pub layers: Vec<String>,
}

/// A fully-resolved phase container: the product of [`crate::phase_config`]
/// composition, ready to hand to the daemon.
#[derive(Debug, Clone, Default)]
pub struct PhaseContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<String>,
    pub network: Option<String>,
    pub privileged: bool,
    pub user: Option<String>,
}

/// Container daemon operations consumed by the orchestrator (§6).
///
/// Every call accepts no explicit cancellation token here; callers drive
/// cancellation by racing these futures against a cancellation signal (see
/// [`crate::scheduler`]) and invoking `container_remove` on abort.
#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn volume_create(&self, name: &str) -> Result<()>;

    async fn volume_remove(&self, name: &str, force: bool) -> Result<()>;

    /// Build an image from a tar-packaged build context. The returned string
    /// is the fully consumed build log; callers must not start another build
    /// before this future resolves, to avoid deadlocking the daemon's log
    /// pipe (§9 "Daemon-side image builds").
    async fn image_build(&self, context_tar: Vec<u8>, opts: &ImageBuildOptions) -> Result<String>;

    async fn image_inspect(&self, reference: &str) -> Result<ImageInspect>;

    /// Stream the image (and its layers) out of the daemon as a tar archive,
    /// in the `docker save` format: an outer tar containing `manifest.json`
    /// plus one uncompressed layer tar per entry in `RootFS.Layers`, in the
    /// same order. Used to extract real layer blobs for OCI layout export.
    async fn image_save(&self, reference: &str) -> Result<Vec<u8>>;

    async fn container_create(&self, spec: &PhaseContainerSpec) -> Result<String>;

    async fn container_start(&self, id: &str) -> Result<()>;

    /// Wait for the container to exit, returning its exit code.
    async fn container_wait(&self, id: &str) -> Result<i64>;

    async fn container_logs(&self, id: &str) -> Result<String>;

    async fn container_remove(&self, id: &str) -> Result<()>;

    async fn copy_to(&self, id: &str, host_path: &Path, container_path: &str) -> Result<()>;

    async fn copy_from(&self, id: &str, container_path: &str, host_path: &Path) -> Result<()>;
}

/// `docker` CLI-backed implementation of [`ContainerDaemon`].
#[derive(Debug, Clone)]
pub struct CliContainerDaemon {
    docker_path: String,
}

impl Default for CliContainerDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl CliContainerDaemon {
    pub fn new() -> Self {
        Self {
            docker_path: "docker".to_string(),
        }
    }

    pub fn with_path(docker_path: String) -> Self {
        Self { docker_path }
    }

    fn spec_to_args(spec: &PhaseContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if spec.privileged {
            args.push("--privileged".to_string());
        }
        if let Some(user) = &spec.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        if let Some(network) = &spec.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for bind in &spec.binds {
            args.push("--mount".to_string());
            args.push(bind.clone());
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output> {
        let docker_path = self.docker_path.clone();
        tokio::task::spawn_blocking(move || {
            Command::new(&docker_path)
                .args(&args)
                .output()
                .map_err(|e| DockerError::CLIError(format!("failed to exec docker: {e}")))
        })
        .await
        .map_err(|e| DockerError::Join(e.to_string()))?
        .map_err(OrchestratorError::Docker)
    }

    fn check(output: std::process::Output, action: &str) -> Result<String> {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Docker(DockerError::CLIError(format!(
                "{action} failed: {stderr}"
            ))));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl ContainerDaemon for CliContainerDaemon {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<()> {
        let output = self.run(vec!["version".to_string(), "--format".to_string(), "{{.Server.Version}}".to_string()]).await?;
        Self::check(output, "docker version").map(|_| ())
    }

    #[instrument(skip(self))]
    async fn volume_create(&self, name: &str) -> Result<()> {
        debug!(volume = name, "creating volume");
        let output = self.run(vec!["volume".to_string(), "create".to_string(), name.to_string()]).await?;
        Self::check(output, "docker volume create").map(|_| ())
    }

    #[instrument(skip(self))]
    async fn volume_remove(&self, name: &str, force: bool) -> Result<()> {
        debug!(volume = name, force, "removing volume");
        let mut args = vec!["volume".to_string(), "rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(name.to_string());
        let output = self.run(args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("No such volume") {
            return Err(OrchestratorError::Docker(DockerError::CLIError(format!(
                "docker volume rm failed: {stderr}"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, context_tar))]
    async fn image_build(&self, context_tar: Vec<u8>, opts: &ImageBuildOptions) -> Result<String> {
        use std::io::Write;

        let mut args = vec!["build".to_string(), "-f".to_string(), opts.dockerfile.clone()];
        for tag in &opts.tags {
            args.push("-t".to_string());
            args.push(tag.clone());
        }
        if opts.remove {
            args.push("--rm".to_string());
        }
        for (key, value) in &opts.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-".to_string());

        let docker_path = self.docker_path.clone();
        tokio::task::spawn_blocking(move || -> std::result::Result<String, DockerError> {
            let mut child = Command::new(&docker_path)
                .args(&args)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| DockerError::ImageBuild(format!("failed to spawn docker build: {e}")))?;

            // The build context tar is written and the stdin handle dropped
            // before we read the response, so the daemon's log pipe can
            // never back up waiting on a write we never make (§9).
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&context_tar)
                    .map_err(|e| DockerError::ImageBuild(format!("failed to write build context: {e}")))?;
            }

            let output = child
                .wait_with_output()
                .map_err(|e| DockerError::ImageBuild(format!("failed to read build output: {e}")))?;

            let log = String::from_utf8_lossy(&output.stdout).to_string();
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DockerError::ImageBuild(format!("{stderr}\n{log}")));
            }
            Ok(log)
        })
        .await
        .map_err(|e| DockerError::Join(e.to_string()))?
        .map_err(OrchestratorError::Docker)
    }

    #[instrument(skip(self))]
    async fn image_inspect(&self, reference: &str) -> Result<ImageInspect> {
        let output = self
            .run(vec!["inspect".to_string(), reference.to_string()])
            .await?;
        let stdout = Self::check(output, "docker image inspect")?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&stdout).map_err(|e| {
            OrchestratorError::Docker(DockerError::CLIError(format!("bad inspect JSON: {e}")))
        })?;
        let entry = parsed.first().ok_or_else(|| {
            OrchestratorError::Docker(DockerError::CLIError(format!("no inspect result for {reference}")))
        })?;

        let id = entry["Id"].as_str().unwrap_or_default().to_string();
        let digest = entry["RepoDigests"]
            .as_array()
            .and_then(|digests| digests.first())
            .and_then(|d| d.as_str())
            .and_then(|d| d.rsplit_once('@').map(|(_, digest)| digest.to_string()));
        let labels = entry["Config"]["Labels"]
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let layers = entry["RootFS"]["Layers"]
            .as_array()
            .map(|layers| layers.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        Ok(ImageInspect { id, digest, labels, layers })
    }

    #[instrument(skip(self))]
    async fn image_save(&self, reference: &str) -> Result<Vec<u8>> {
        let docker_path = self.docker_path.clone();
        let reference = reference.to_string();
        tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, DockerError> {
            let output = Command::new(&docker_path)
                .args(["save", &reference])
                .output()
                .map_err(|e| DockerError::CLIError(format!("failed to exec docker save: {e}")))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DockerError::CLIError(format!("docker save failed: {stderr}")));
            }
            Ok(output.stdout)
        })
        .await
        .map_err(|e| DockerError::Join(e.to_string()))?
        .map_err(OrchestratorError::Docker)
    }

    #[instrument(skip(self, spec))]
    async fn container_create(&self, spec: &PhaseContainerSpec) -> Result<String> {
        let args = Self::spec_to_args(spec);
        let output = self.run(args).await?;
        Self::check(output, "docker create")
    }

    #[instrument(skip(self))]
    async fn container_start(&self, id: &str) -> Result<()> {
        let output = self.run(vec!["start".to_string(), id.to_string()]).await?;
        Self::check(output, "docker start").map(|_| ())
    }

    #[instrument(skip(self))]
    async fn container_wait(&self, id: &str) -> Result<i64> {
        let output = self.run(vec!["wait".to_string(), id.to_string()]).await?;
        let stdout = Self::check(output, "docker wait")?;
        stdout
            .parse::<i64>()
            .map_err(|e| OrchestratorError::Docker(DockerError::CLIError(format!("bad exit code '{stdout}': {e}"))))
    }

    #[instrument(skip(self))]
    async fn container_logs(&self, id: &str) -> Result<String> {
        let output = self.run(vec!["logs".to_string(), id.to_string()]).await?;
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }

    #[instrument(skip(self))]
    async fn container_remove(&self, id: &str) -> Result<()> {
        let output = self.run(vec!["rm".to_string(), "-f".to_string(), id.to_string()]).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() && !stderr.contains("No such container") {
            return Err(OrchestratorError::Docker(DockerError::CLIError(format!(
                "docker rm failed: {stderr}"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_to(&self, id: &str, host_path: &Path, container_path: &str) -> Result<()> {
        let output = self
            .run(vec![
                "cp".to_string(),
                host_path.to_string_lossy().to_string(),
                format!("{id}:{container_path}"),
            ])
            .await?;
        Self::check(output, "docker cp (to)").map(|_| ())
    }

    #[instrument(skip(self))]
    async fn copy_from(&self, id: &str, container_path: &str, host_path: &Path) -> Result<()> {
        let output = self
            .run(vec![
                "cp".to_string(),
                format!("{id}:{container_path}"),
                host_path.to_string_lossy().to_string(),
            ])
            .await?;
        Self::check(output, "docker cp (from)").map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_to_args_orders_env_binds_then_image_then_args() {
        let spec = PhaseContainerSpec {
            image: "builder:latest".to_string(),
            args: vec!["-app".to_string(), "/workspace".to_string()],
            env: vec![("CNB_UID".to_string(), "1000".to_string())],
            binds: vec!["type=volume,source=pack-layers-xxxx,target=/layers".to_string()],
            network: Some("host".to_string()),
            privileged: false,
            user: None,
        };
        let args = CliContainerDaemon::spec_to_args(&spec);
        assert_eq!(args[0], "create");
        assert!(args.contains(&"--network".to_string()));
        let image_pos = args.iter().position(|a| a == "builder:latest").unwrap();
        assert_eq!(args[image_pos + 1], "-app");
        assert_eq!(args[image_pos + 2], "/workspace");
    }

    #[test]
    fn volume_remove_not_found_is_not_an_error_when_checked_by_caller() {
        // Exercised at the integration level against a fake daemon; here we
        // just assert the CLI path exists and constructs without panicking.
        let daemon = CliContainerDaemon::with_path("docker".to_string());
        assert_eq!(daemon.docker_path, "docker");
    }
}
