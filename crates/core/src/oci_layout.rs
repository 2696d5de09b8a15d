//! OCI image layout export
//!
//! When a run uses OCI-layout mode (§4.9) or when the daemon extender needs
//! to hand extended layers back to the build phase, layers are written out
//! as a minimal OCI image layout directory (`oci-layout`, `index.json`,
//! `blobs/sha256/...`) rather than loaded into the daemon's own image
//! store.
//!
//! [`save_layers_above`] works from the raw bytes of a `docker save` tar
//! (see [`crate::docker::ContainerDaemon::image_save`]), not from layer
//! digests alone: only the tar actually contains the layer content this
//! module must persist. `docker save`'s legacy export format writes each
//! layer as an uncompressed `<id>/layer.tar`, listed in order under
//! `manifest.json`'s `Layers` array; that array's order matches
//! `ImageInspect::layers` (`.RootFS.Layers`), and because the tar is
//! uncompressed, `sha256(layer.tar bytes)` is the layer's diff-id.

use crate::docker::ImageInspect;
use crate::errors::{DockerError, OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

const OCI_LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize)]
struct OciLayoutFile {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

#[derive(Debug, Serialize)]
struct OciIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct OciManifest {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    config: OciDescriptor,
    layers: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct DockerSaveManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

fn tar_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Docker(DockerError::ImageBuild(format!("failed reading docker save tar: {e}")))
}

fn io_err(what: &str, e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Docker(DockerError::ImageBuild(format!("{what}: {e}")))
}

fn find_manifest_entry(image_tar: &[u8]) -> Result<DockerSaveManifestEntry> {
    let mut archive = tar::Archive::new(image_tar);
    for entry in archive.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let path = entry.path().map_err(tar_err)?.to_string_lossy().to_string();
        if path == "manifest.json" {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(tar_err)?;
            let entries: Vec<DockerSaveManifestEntry> = serde_json::from_slice(&buf).map_err(|e| {
                OrchestratorError::Docker(DockerError::ImageBuild(format!(
                    "failed to parse docker save manifest.json: {e}"
                )))
            })?;
            return entries.into_iter().next().ok_or_else(|| {
                OrchestratorError::Docker(DockerError::ImageBuild(
                    "docker save manifest.json is empty".to_string(),
                ))
            });
        }
    }
    Err(OrchestratorError::Docker(DockerError::ImageBuild(
        "docker save tar has no manifest.json".to_string(),
    )))
}

fn read_tar_entries(image_tar: &[u8], wanted: &HashMap<String, ()>) -> Result<HashMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(image_tar);
    let mut found = HashMap::new();
    for entry in archive.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let path = entry.path().map_err(tar_err)?.to_string_lossy().to_string();
        if wanted.contains_key(&path) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(tar_err)?;
            found.insert(path, buf);
        }
    }
    Ok(found)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| io_err(&format!("failed to serialize {}", path.display()), e))?;
    std::fs::write(path, bytes).map_err(|e| io_err(&format!("failed to write {}", path.display()), e))
}

fn write_blob(export_dir: &Path, bytes: &[u8]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = format!("{:x}", hasher.finalize());
    let path = export_dir.join("blobs").join("sha256").join(&hex);
    std::fs::write(&path, bytes).map_err(|e| io_err(&format!("failed to write blob {}", path.display()), e))?;
    Ok(format!("sha256:{hex}"))
}

/// Persist, in OCI layout form under `export_dir`, only the layers of
/// `inspected` that sit above `base_top_layer_hash` in its layer list
/// (§4.5 `SaveLayers`). `image_tar` is the full `docker save` export of
/// the already-extended image that `inspected` describes.
///
/// If `base_top_layer_hash` isn't found in `inspected.layers` at all (the
/// base image predates the hash being recorded, or extension ran against
/// an image with no prior layers), every layer is treated as newly added.
pub fn save_layers_above(
    export_dir: &Path,
    inspected: &ImageInspect,
    base_top_layer_hash: &str,
    image_tar: &[u8],
) -> Result<String> {
    std::fs::create_dir_all(export_dir.join("blobs").join("sha256"))
        .map_err(|e| io_err("failed to create oci layout dir", e))?;
    write_json(
        &export_dir.join("oci-layout"),
        &OciLayoutFile { image_layout_version: OCI_LAYOUT_VERSION.to_string() },
    )?;

    let new_layer_count = match inspected.layers.iter().position(|l| l == base_top_layer_hash) {
        Some(idx) => inspected.layers.len() - (idx + 1),
        None => inspected.layers.len(),
    };

    if new_layer_count == 0 {
        write_json(&export_dir.join("index.json"), &OciIndex { schema_version: 2, manifests: Vec::new() })?;
        return Ok(inspected.digest.clone().unwrap_or_else(|| inspected.id.clone()));
    }

    let manifest_entry = find_manifest_entry(image_tar)?;
    if manifest_entry.layers.len() != inspected.layers.len() {
        return Err(OrchestratorError::Docker(DockerError::ImageBuild(format!(
            "docker save manifest lists {} layers but image inspect reports {}",
            manifest_entry.layers.len(),
            inspected.layers.len()
        ))));
    }

    let layers_to_persist = &manifest_entry.layers[manifest_entry.layers.len() - new_layer_count..];
    let mut wanted: HashMap<String, ()> = layers_to_persist.iter().cloned().map(|p| (p, ())).collect();
    wanted.insert(manifest_entry.config.clone(), ());
    let mut blobs = read_tar_entries(image_tar, &wanted)?;

    let mut layer_descriptors = Vec::with_capacity(layers_to_persist.len());
    for path in layers_to_persist {
        let bytes = blobs
            .remove(path)
            .ok_or_else(|| OrchestratorError::Docker(DockerError::ImageBuild(format!("layer {path} missing from docker save tar"))))?;
        let digest = write_blob(export_dir, &bytes)?;
        layer_descriptors.push(OciDescriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar".to_string(),
            digest,
            size: bytes.len() as u64,
        });
    }

    let config_bytes = blobs.remove(&manifest_entry.config).ok_or_else(|| {
        OrchestratorError::Docker(DockerError::ImageBuild(format!(
            "config {} missing from docker save tar",
            manifest_entry.config
        )))
    })?;
    let config_digest = write_blob(export_dir, &config_bytes)?;
    let config_descriptor = OciDescriptor {
        media_type: "application/vnd.oci.image.config.v1+json".to_string(),
        digest: config_digest,
        size: config_bytes.len() as u64,
    };

    let manifest = OciManifest { schema_version: 2, config: config_descriptor, layers: layer_descriptors };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| io_err("failed to serialize oci manifest", e))?;
    let manifest_digest = write_blob(export_dir, &manifest_bytes)?;

    write_json(
        &export_dir.join("index.json"),
        &OciIndex {
            schema_version: 2,
            manifests: vec![OciDescriptor {
                media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                digest: manifest_digest.clone(),
                size: manifest_bytes.len() as u64,
            }],
        },
    )?;

    Ok(manifest_digest)
}
