//! Extensions inspection
//!
//! After detect runs, `group.toml` may list one or more buildpacks with
//! `extension = true`, each of which may have dropped a generated Dockerfile
//! under the detector's copy-out tree. This module answers the three
//! questions the scheduler needs about that tree: are there build-affecting
//! extensions, are there run-affecting extensions, and what is the
//! replacement run image (if any) an extension selected, plus whether the
//! builder being used declares any extensions at all (consulted before the
//! creator path starts a container).
//!
//! The detector's copy-out lands generated Dockerfiles under
//! `<tmp>/generated/build` and `<tmp>/generated/run`, not `<tmp>/build` —
//! the detector writes its own scratch output under `<tmp>/build` first and
//! only promotes the extension-relevant subset into `generated/` once it
//! finishes, so checking `<tmp>/build` directly would see the detector's
//! working files rather than the extensions the scheduler cares about.
//!
//! Whether run-kind extensions actually apply is read from `analyzed.toml`'s
//! `run-image` table, not from the presence of files under `generated/run`:
//! the detector may emit a run Dockerfile without the analyzer having
//! decided to extend (the two phases can run in either order depending on
//! platform API), so `analyzed.toml` is the single source of truth for
//! whether the run image should be extended.

use crate::errors::{OrchestratorError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
struct GroupToml {
    #[serde(default)]
    group: Vec<BuildpackRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct BuildpackRef {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    #[serde(default)]
    extension: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnalyzedToml {
    #[serde(rename = "run-image", default)]
    run_image: Option<RunImageMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RunImageMeta {
    #[serde(default)]
    extend: bool,
    #[serde(default)]
    image: Option<String>,
}

/// A Dockerfile an extension generated, with the buildpack id it came from.
#[derive(Debug, Clone)]
pub struct ExtensionDockerfile {
    pub buildpack_id: String,
    pub path: PathBuf,
}

/// The result of inspecting one run's extensions tree.
#[derive(Debug, Clone, Default)]
pub struct ExtensionsInfo {
    pub build_dockerfiles: Vec<ExtensionDockerfile>,
    pub run_dockerfiles: Vec<ExtensionDockerfile>,
    run_extends: bool,
    run_image_override: Option<String>,
}

impl ExtensionsInfo {
    pub fn has_extensions_for_build(&self) -> bool {
        !self.build_dockerfiles.is_empty()
    }

    /// True iff `analyzed.toml`'s `run-image.extend` field is true, not
    /// merely because a generated run Dockerfile exists on disk.
    pub fn has_extensions_for_run(&self) -> bool {
        self.run_extends
    }

    /// The run image a build-kind creator/export step should target: the
    /// extension's override if one ran, otherwise the caller's own choice.
    pub fn run_image_after_extensions(&self, requested_run_image: &str) -> String {
        self.run_image_override
            .clone()
            .unwrap_or_else(|| requested_run_image.to_string())
    }
}

/// Inspect the detector's copy-out tree under `tmp_dir` for extensions.
///
/// `tmp_dir` is the scheduler's scratch directory (the same one recorded in
/// [`crate::run_state::RunState`]), `group_toml_bytes` is the parsed
/// `group.toml` bytes copied out of the detect phase, and `analyzed_toml_bytes`
/// is the analyze phase's `analyzed.toml`, when it has already run. A missing
/// or malformed `analyzed.toml` degrades to "no run extension" rather than
/// failing the run (§9 "Extensions metadata").
pub fn inspect(
    tmp_dir: &Path,
    group_toml_bytes: &[u8],
    analyzed_toml_bytes: Option<&[u8]>,
) -> Result<ExtensionsInfo> {
    let group_toml_str = std::str::from_utf8(group_toml_bytes)
        .map_err(|e| OrchestratorError::Extensions(format!("group.toml is not valid UTF-8: {e}")))?;
    let group: GroupToml = toml::from_str(group_toml_str).map_err(|e| {
        OrchestratorError::Extensions(format!("failed to parse group.toml: {e}"))
    })?;

    let analyzed: AnalyzedToml = analyzed_toml_bytes
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .and_then(|s| toml::from_str(s).ok())
        .unwrap_or_default();

    let generated_build = tmp_dir.join("generated").join("build");
    let generated_run = tmp_dir.join("generated").join("run");

    let mut info = ExtensionsInfo {
        run_extends: analyzed.run_image.as_ref().map(|r| r.extend).unwrap_or(false),
        run_image_override: analyzed.run_image.as_ref().and_then(|r| r.image.clone()),
        ..Default::default()
    };

    for buildpack in group.group.iter().filter(|b| b.extension) {
        let dockerfile = generated_build.join(&buildpack.id).join("Dockerfile");
        if dockerfile.exists() {
            info.build_dockerfiles.push(ExtensionDockerfile {
                buildpack_id: buildpack.id.clone(),
                path: dockerfile,
            });
        }

        let run_dockerfile = generated_run.join(&buildpack.id).join("Dockerfile");
        if run_dockerfile.exists() {
            info.run_dockerfiles.push(ExtensionDockerfile {
                buildpack_id: buildpack.id.clone(),
                path: run_dockerfile,
            });
        }
    }

    Ok(info)
}

/// Does the builder image declare any extensions in its order, per its
/// `io.buildpacks.builder.metadata` label? Consulted before the creator path
/// starts any container, since the creator cannot run detect first to find
/// out (§4.6 Branch A, Scenario 6).
///
/// Malformed or absent metadata degrades to `false` rather than failing,
/// matching the inspector's general defensive-parsing posture.
pub fn builder_declares_extensions(labels: &HashMap<String, String>) -> bool {
    let Some(raw) = labels.get("io.buildpacks.builder.metadata") else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return false;
    };
    value
        .get("extensions")
        .and_then(|v| v.as_array())
        .map(|arr| !arr.is_empty())
        .unwrap_or(false)
}
