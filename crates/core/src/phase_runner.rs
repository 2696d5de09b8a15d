//! Phase container lifecycle
//!
//! Runs a single [`PhaseConfig`] to completion: create, start, wait, collect
//! logs, copy out the files the phase promised, and remove the container.
//! Removal always runs, success or failure, so a crashed phase never leaves
//! a stray container behind (R1).

use crate::docker::ContainerDaemon;
use crate::errors::{DockerError, OrchestratorError, Result};
use crate::phase_config::PhaseConfig;
use tracing::{debug, info, instrument, warn};

/// The outcome of a completed phase: its container's log output, in case a
/// caller wants to surface it on failure.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: String,
    pub exit_code: i64,
    pub logs: String,
}

/// Run `config` to completion against `daemon`, copying out every file it
/// declared. Returns `Err` wrapped with [`OrchestratorError::in_phase`] if
/// the container exits non-zero or any daemon call fails; cleanup still
/// runs in that case before the error is returned.
#[instrument(skip(daemon, config), fields(phase = %config.phase))]
pub async fn run_phase(daemon: &dyn ContainerDaemon, config: PhaseConfig) -> Result<PhaseOutcome> {
    let phase = config.phase.clone();
    let copy_out = config.copy_out.clone();
    let spec = config.into_container_spec();

    let container_id = daemon
        .container_create(&spec)
        .await
        .map_err(|e| e.in_phase(phase.clone()))?;

    let result = run_started_container(daemon, &container_id, &phase, &copy_out).await;

    if let Err(e) = daemon.container_remove(&container_id).await {
        warn!(container = container_id.as_str(), error = %e, "failed to remove phase container");
    }

    result
}

async fn run_started_container(
    daemon: &dyn ContainerDaemon,
    container_id: &str,
    phase: &str,
    copy_out: &[(String, std::path::PathBuf)],
) -> Result<PhaseOutcome> {
    daemon
        .container_start(container_id)
        .await
        .map_err(|e| e.in_phase(phase.to_string()))?;

    let exit_code = daemon
        .container_wait(container_id)
        .await
        .map_err(|e| e.in_phase(phase.to_string()))?;

    let logs = daemon.container_logs(container_id).await.unwrap_or_default();

    if exit_code != 0 {
        return Err(OrchestratorError::Docker(DockerError::NonZeroExit {
            code: exit_code as i32,
            message: logs.clone(),
        })
        .in_phase(phase.to_string()));
    }

    for (container_path, host_dest) in copy_out {
        if let Some(parent) = host_dest.parent() {
            std::fs::create_dir_all(parent).map_err(OrchestratorError::Io)?;
        }
        daemon
            .copy_from(container_id, container_path, host_dest)
            .await
            .map_err(|e| e.in_phase(phase.to_string()))?;
        debug!(container_path = container_path.as_str(), host_dest = %host_dest.display(), "copied phase output");
    }

    info!(phase, exit_code, "phase completed");
    Ok(PhaseOutcome {
        phase: phase.to_string(),
        exit_code,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ImageBuildOptions, ImageInspect, PhaseContainerSpec};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDaemon {
        exit_code: i64,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerDaemon for FakeDaemon {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn volume_create(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn volume_remove(&self, _name: &str, _force: bool) -> Result<()> {
            Ok(())
        }
        async fn image_build(&self, _tar: Vec<u8>, _opts: &ImageBuildOptions) -> Result<String> {
            unimplemented!()
        }
        async fn image_inspect(&self, _reference: &str) -> Result<ImageInspect> {
            unimplemented!()
        }
        async fn image_save(&self, _reference: &str) -> Result<Vec<u8>> {
            unimplemented!()
        }
        async fn container_create(&self, _spec: &PhaseContainerSpec) -> Result<String> {
            Ok("container-1".to_string())
        }
        async fn container_start(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn container_wait(&self, _id: &str) -> Result<i64> {
            Ok(self.exit_code)
        }
        async fn container_logs(&self, _id: &str) -> Result<String> {
            Ok("log output".to_string())
        }
        async fn container_remove(&self, id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn copy_to(&self, _id: &str, _host_path: &Path, _container_path: &str) -> Result<()> {
            Ok(())
        }
        async fn copy_from(&self, _id: &str, _container_path: &str, host_path: &Path) -> Result<()> {
            std::fs::write(host_path, b"contents").unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn succeeds_and_copies_out_declared_files() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = FakeDaemon::default();
        let mut config = PhaseConfig::new("detect", "builder:latest");
        config.copy_out.push(("/layers/group.toml".to_string(), dir.path().join("group.toml")));

        let outcome = run_phase(&daemon, config).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(dir.path().join("group.toml").exists());
        assert_eq!(*daemon.removed.lock().unwrap(), vec!["container-1".to_string()]);
    }

    #[tokio::test]
    async fn removes_container_even_on_nonzero_exit() {
        let daemon = FakeDaemon {
            exit_code: 1,
            removed: Mutex::new(Vec::new()),
        };
        let config = PhaseConfig::new("build", "builder:latest");
        let err = run_phase(&daemon, config).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Phase { .. }));
        assert_eq!(*daemon.removed.lock().unwrap(), vec!["container-1".to_string()]);
    }
}
