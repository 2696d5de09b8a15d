//! Daemon-side image extension
//!
//! When run-kind extensions are present but the build is happening against
//! the local daemon (not in-container via kaniko, i.e. `opts.Publish` is
//! false), the daemon itself applies each generated Dockerfile as a layered
//! image build: one `ImageBuild` call per Dockerfile, each consuming a
//! tar'd copy of the Dockerfile's parent directory as its build context.
//! The run image's pre-extension top-layer hash is fetched concurrently
//! with the Dockerfile application, then every layer added above that hash
//! is exported to an OCI layout under `tmpDir/extended-new/run/<digest>`
//! for the build phase to pick back up (§4.5, §4.6, §9).

use crate::docker::{ContainerDaemon, ImageBuildOptions};
use crate::errors::{DockerError, OrchestratorError, Result};
use crate::extensions::ExtensionDockerfile;
use crate::oci_layout;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Package a Dockerfile's parent directory as a tar archive, for use as a
/// docker build context (§9 "Daemon-side image builds").
pub fn package_context(dockerfile_dir: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut buf);
        builder
            .append_dir_all(".", dockerfile_dir)
            .map_err(|e| OrchestratorError::Docker(DockerError::ImageBuild(format!(
                "failed to package build context from {}: {e}",
                dockerfile_dir.display()
            ))))?;
        builder
            .finish()
            .map_err(|e| OrchestratorError::Docker(DockerError::ImageBuild(e.to_string())))?;
    }
    Ok(buf)
}

/// Apply one extension Dockerfile against `base_image`, returning the new
/// image tag. Each call consumes and fully drains its own build response
/// before returning, so a failed build never leaves a dangling log stream
/// for the next one to trip over.
#[instrument(skip(daemon))]
async fn apply_one(
    daemon: &dyn ContainerDaemon,
    base_image: &str,
    dockerfile: &ExtensionDockerfile,
    tag: &str,
) -> Result<String> {
    let dockerfile_dir = dockerfile
        .path
        .parent()
        .ok_or_else(|| OrchestratorError::Extensions(format!(
            "extension Dockerfile {} has no parent directory",
            dockerfile.path.display()
        )))?;

    let context = package_context(dockerfile_dir)?;
    let opts = ImageBuildOptions {
        dockerfile: "Dockerfile".to_string(),
        tags: vec![tag.to_string()],
        remove: true,
        build_args: [("base_image".to_string(), base_image.to_string())].into(),
    };

    let log = daemon.image_build(context, &opts).await?;
    debug!(buildpack = dockerfile.buildpack_id.as_str(), bytes = log.len(), "applied extension Dockerfile");
    Ok(tag.to_string())
}

/// Apply every build-kind extension Dockerfile in order, chaining each
/// result image as the next Dockerfile's base, and return the final tag.
/// An empty `dockerfiles` list is a no-op that returns `base_image` itself.
pub async fn apply_build_extensions(
    daemon: &dyn ContainerDaemon,
    base_image: &str,
    dockerfiles: &[ExtensionDockerfile],
    tag_prefix: &str,
) -> Result<String> {
    let mut current = base_image.to_string();
    for (idx, dockerfile) in dockerfiles.iter().enumerate() {
        let tag = format!("{tag_prefix}-{idx}:latest");
        current = apply_one(daemon, &current, dockerfile, &tag).await?;
    }
    Ok(current)
}

/// The run image's current top layer diff-id, or an empty string if it has
/// no layers at all (a from-scratch base).
async fn top_layer_hash(daemon: &dyn ContainerDaemon, image_reference: &str) -> Result<String> {
    let inspected = daemon.image_inspect(image_reference).await?;
    Ok(inspected.layers.last().cloned().unwrap_or_default())
}

/// Apply run-kind extensions and export the newly added layers to an OCI
/// layout under `tmp_dir/extended-new/run/<digest>`, returning the
/// extended image's tag and that export directory.
///
/// The pre-extension top-layer hash and the Dockerfile application run
/// concurrently via [`tokio::join!`]; both borrow `daemon` so neither can
/// be spawned onto a `'static` task, but running them concurrently still
/// avoids serializing a daemon round-trip behind a potentially slow image
/// build. Either side's error is propagated, not swallowed (§9 Open
/// Question).
#[instrument(skip(daemon))]
pub async fn extend_run_image(
    daemon: &dyn ContainerDaemon,
    run_image: &str,
    dockerfiles: Vec<ExtensionDockerfile>,
    tmp_dir: &Path,
    tag_prefix: &str,
) -> Result<(String, PathBuf)> {
    let (base_top_layer_hash, extended_tag) = tokio::join!(
        top_layer_hash(daemon, run_image),
        apply_build_extensions(daemon, run_image, &dockerfiles, tag_prefix),
    );
    let base_top_layer_hash = base_top_layer_hash?;
    let extended_tag = extended_tag?;

    let inspected = daemon.image_inspect(&extended_tag).await?;
    let image_tar = daemon.image_save(&extended_tag).await?;

    let digest = inspected.digest.clone().unwrap_or_else(|| inspected.id.clone());
    let digest_hex = digest.trim_start_matches("sha256:");
    let export_dir = tmp_dir.join("extended-new").join("run").join(digest_hex);
    std::fs::create_dir_all(&export_dir).map_err(|e| {
        OrchestratorError::Docker(DockerError::ImageBuild(format!(
            "failed to create {}: {e}",
            export_dir.display()
        )))
    })?;

    oci_layout::save_layers_above(&export_dir, &inspected, &base_top_layer_hash, &image_tar)?;

    Ok((extended_tag, export_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ImageInspect, PhaseContainerSpec};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeDaemon {
        layers: Vec<String>,
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
        async fn image_build(&self, _context: Vec<u8>, _opts: &ImageBuildOptions) -> Result<String> {
            Ok(String::new())
        }
        async fn image_inspect(&self, _reference: &str) -> Result<ImageInspect> {
            Ok(ImageInspect {
                id: "sha256:final".to_string(),
                digest: Some("sha256:final".to_string()),
                labels: HashMap::new(),
                layers: self.layers.clone(),
            })
        }
        async fn image_save(&self, _reference: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn container_create(&self, _spec: &PhaseContainerSpec) -> Result<String> {
            Ok(String::new())
        }
        async fn container_start(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn container_wait(&self, _id: &str) -> Result<i64> {
            Ok(0)
        }
        async fn container_logs(&self, _id: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn container_remove(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn copy_to(&self, _id: &str, _host: &Path, _container: &str) -> Result<()> {
            Ok(())
        }
        async fn copy_from(&self, _id: &str, _container: &str, _host: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn top_layer_hash_reads_the_last_layer_from_inspect() {
        let daemon = FakeDaemon { layers: vec!["sha256:a".to_string(), "sha256:b".to_string()] };
        let hash = top_layer_hash(&daemon, "run-image:latest").await.unwrap();
        assert_eq!(hash, "sha256:b");
    }

    #[tokio::test]
    async fn top_layer_hash_is_empty_for_a_layerless_image() {
        let daemon = FakeDaemon { layers: Vec::new() };
        let hash = top_layer_hash(&daemon, "scratch:latest").await.unwrap();
        assert_eq!(hash, "");
    }

    #[tokio::test]
    async fn apply_build_extensions_is_a_noop_with_no_dockerfiles() {
        let daemon = FakeDaemon { layers: Vec::new() };
        let result = apply_build_extensions(&daemon, "base:latest", &[], "tag").await.unwrap();
        assert_eq!(result, "base:latest");
    }

    #[test]
    fn package_context_tars_the_dockerfile_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let tar_bytes = package_context(dir.path()).unwrap();
        assert!(!tar_bytes.is_empty());

        let mut archive = tar::Archive::new(&tar_bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("Dockerfile")));
    }
}
