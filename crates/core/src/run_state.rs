//! Per-run scratch state and cleanup
//!
//! [`RunState`] owns everything a single scheduler invocation allocates
//! outside the daemon's own image store: a scratch temp directory and any
//! volumes it creates for anonymous build/launch caches. Cleanup is
//! best-effort and idempotent (R1): every resource is attempted exactly
//! once regardless of earlier failures, and the first error encountered is
//! what gets reported, not the last overwriting it (P9).

use crate::docker::ContainerDaemon;
use crate::errors::{OrchestratorError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Names reserved by the daemon or by convention; never handed out as a
/// generated volume name even if the random generator collides with one.
const RESERVED_VOLUME_NAMES: &[&str] = &["none", "default", "bridge", "host"];

/// Generate a random, non-reserved volume name with the given prefix.
pub fn random_volume_name(prefix: &str) -> String {
    loop {
        let suffix: String = (0..8)
            .map(|_| {
                let idx = fastrand::usize(0..36);
                char::from_digit(idx as u32, 36).unwrap_or('0')
            })
            .collect();
        let name = format!("{prefix}-{suffix}");
        if !RESERVED_VOLUME_NAMES.contains(&name.as_str()) {
            return name;
        }
    }
}

/// Tracks everything a run allocated so it can be torn down once, in full,
/// regardless of whether the run itself succeeded.
#[derive(Debug, Default)]
pub struct RunState {
    tmp_dir: Option<PathBuf>,
    owned_volumes: Vec<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tmp_dir(&mut self, dir: PathBuf) {
        self.tmp_dir = Some(dir);
    }

    pub fn tmp_dir(&self) -> Option<&Path> {
        self.tmp_dir.as_deref()
    }

    /// Record a volume this run created, so it is removed during cleanup.
    /// Volumes the caller supplied explicitly are never recorded here and
    /// outlive the run.
    pub fn own_volume(&mut self, name: impl Into<String>) {
        self.owned_volumes.push(name.into());
    }

    /// Remove every owned volume and the scratch directory. Every resource
    /// is attempted even if an earlier one fails; the first failure
    /// encountered is returned once all attempts have completed.
    pub async fn cleanup(&self, daemon: &dyn ContainerDaemon) -> Result<()> {
        let mut first_error: Option<OrchestratorError> = None;

        for volume in &self.owned_volumes {
            if let Err(e) = daemon.volume_remove(volume, true).await {
                warn!(volume = volume.as_str(), error = %e, "failed to remove volume during cleanup");
                if first_error.is_none() {
                    first_error = Some(OrchestratorError::Cleanup(format!(
                        "failed to remove volume '{volume}': {e}"
                    )));
                }
            } else {
                debug!(volume = volume.as_str(), "removed volume");
            }
        }

        if let Some(dir) = &self.tmp_dir {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %e, "failed to remove scratch directory during cleanup");
                    if first_error.is_none() {
                        first_error = Some(OrchestratorError::Cleanup(format!(
                            "failed to remove scratch dir '{}': {e}",
                            dir.display()
                        )));
                    }
                } else {
                    debug!(dir = %dir.display(), "removed scratch directory");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
