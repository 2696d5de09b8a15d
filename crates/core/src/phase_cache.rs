//! Build and launch cache selection
//!
//! A run's build cache can be backed by a registry image, a named volume, or
//! a host bind mount; the launch cache is volume-or-bind only (no registry
//! option makes sense for a cache that never leaves the host). Extensions
//! require a volume build cache (P3) because kaniko needs a writable,
//! persistent directory it can snapshot between builds.

use crate::docker::ContainerDaemon;
use crate::errors::{ConfigError, OrchestratorError, Result};
use crate::registry_parser::looks_like_registry;

/// A resolved cache location for one of the run's two caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cache {
    Image(String),
    Volume(String),
    Bind(String),
}

impl Cache {
    pub fn kind(&self) -> &'static str {
        match self {
            Cache::Image(_) => "image",
            Cache::Volume(_) => "volume",
            Cache::Bind(_) => "bind",
        }
    }

    /// The docker-flag value this cache resolves to (`-cache-image`,
    /// `--mount type=volume,...` or `--mount type=bind,...`).
    pub fn reference(&self) -> &str {
        match self {
            Cache::Image(r) | Cache::Volume(r) | Cache::Bind(r) => r,
        }
    }

    /// Clear this cache's contents before a run uses it (§4.2, `opts.ClearCache`).
    ///
    /// A volume cache is cleared by removing and not recreating the volume;
    /// the scheduler recreates it immediately after if it still needs one. A
    /// bind cache is cleared by removing its directory contents. A registry
    /// image cache can't be cleared through the daemon client at all (there
    /// is no "clear this remote image" operation) so this is a no-op, logged
    /// at warn.
    pub async fn clear(&self, daemon: &dyn ContainerDaemon) -> Result<()> {
        match self {
            Cache::Volume(name) => {
                tracing::debug!(volume = name.as_str(), "clearing volume cache");
                daemon.volume_remove(name, true).await
            }
            Cache::Bind(path) => {
                tracing::debug!(path = path.as_str(), "clearing bind cache");
                if std::path::Path::new(path).exists() {
                    std::fs::remove_dir_all(path).map_err(OrchestratorError::Io)?;
                    std::fs::create_dir_all(path).map_err(OrchestratorError::Io)?;
                }
                Ok(())
            }
            Cache::Image(reference) => {
                tracing::warn!(image = reference.as_str(), "cannot clear a registry image cache, ignoring --clear-cache for it");
                Ok(())
            }
        }
    }
}

/// Raw, as-given-by-the-caller cache selector before validation.
#[derive(Debug, Clone, Default)]
pub struct CacheSelector {
    pub image: Option<String>,
    pub volume: Option<String>,
    pub bind: Option<String>,
}

impl CacheSelector {
    /// Resolve a build cache, given whether the run has extensions applied.
    ///
    /// Exactly one of `image`/`volume`/`bind` must be set unless none are,
    /// in which case a weak best-effort heuristic on `image` being absent
    /// defaults to a volume named for the target image (§4.2). When
    /// extensions are present the resolved cache must be a volume (P3).
    pub fn resolve_build_cache(&self, has_extensions: bool, default_volume_name: &str) -> Result<Cache> {
        let resolved = self.resolve_any(default_volume_name)?;
        if has_extensions && !matches!(resolved, Cache::Volume(_)) {
            return Err(OrchestratorError::Config(
                ConfigError::ExtensionsRequireVolumeCache {
                    actual: resolved.kind().to_string(),
                },
            ));
        }
        Ok(resolved)
    }

    /// Resolve a launch cache. Registry-image launch caches are rejected;
    /// callers needing persistence across runs should use a volume.
    pub fn resolve_launch_cache(&self, default_volume_name: &str) -> Result<Cache> {
        if self.image.is_some() {
            return Err(OrchestratorError::Config(ConfigError::Validation {
                message: "launch cache cannot be a registry image".to_string(),
            }));
        }
        self.resolve_any(default_volume_name)
    }

    fn resolve_any(&self, default_volume_name: &str) -> Result<Cache> {
        let set_count = [self.image.is_some(), self.volume.is_some(), self.bind.is_some()]
            .iter()
            .filter(|v| **v)
            .count();
        if set_count > 1 {
            return Err(OrchestratorError::Config(ConfigError::Validation {
                message: "at most one of image/volume/bind cache may be set".to_string(),
            }));
        }

        if let Some(image) = &self.image {
            if !looks_like_registry(image) {
                tracing::warn!(cache_image = image, "cache image reference does not look like a registry reference");
            }
            return Ok(Cache::Image(image.clone()));
        }
        if let Some(volume) = &self.volume {
            return Ok(Cache::Volume(volume.clone()));
        }
        if let Some(bind) = &self.bind {
            return Ok(Cache::Bind(bind.clone()));
        }
        Ok(Cache::Volume(default_volume_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_named_volume_when_unset() {
        let sel = CacheSelector::default();
        let cache = sel.resolve_build_cache(false, "my-app-cache").unwrap();
        assert_eq!(cache, Cache::Volume("my-app-cache".to_string()));
    }

    #[test]
    fn extensions_require_volume_cache() {
        let sel = CacheSelector {
            image: Some("index.docker.io/acme/cache".to_string()),
            ..Default::default()
        };
        let err = sel.resolve_build_cache(true, "fallback").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Config(ConfigError::ExtensionsRequireVolumeCache { .. })
        ));
    }

    #[test]
    fn extensions_with_explicit_volume_is_fine() {
        let sel = CacheSelector {
            volume: Some("pack-cache-xyz".to_string()),
            ..Default::default()
        };
        let cache = sel.resolve_build_cache(true, "fallback").unwrap();
        assert_eq!(cache, Cache::Volume("pack-cache-xyz".to_string()));
    }

    #[test]
    fn launch_cache_rejects_registry_image() {
        let sel = CacheSelector {
            image: Some("index.docker.io/acme/cache".to_string()),
            ..Default::default()
        };
        let err = sel.resolve_launch_cache("fallback").unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigError::Validation { .. })));
    }

    #[test]
    fn rejects_more_than_one_selector() {
        let sel = CacheSelector {
            image: Some("a".to_string()),
            volume: Some("b".to_string()),
            ..Default::default()
        };
        assert!(sel.resolve_build_cache(false, "fallback").is_err());
    }

    #[test]
    fn clearing_a_registry_image_cache_is_a_noop() {
        use crate::docker::{ImageBuildOptions, ImageInspect, PhaseContainerSpec};
        use async_trait::async_trait;
        use std::path::Path;
        use std::sync::Mutex;

        struct RecordingDaemon {
            removed: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl ContainerDaemon for RecordingDaemon {
            async fn ping(&self) -> Result<()> {
                Ok(())
            }
            async fn volume_create(&self, _name: &str) -> Result<()> {
                Ok(())
            }
            async fn volume_remove(&self, name: &str, _force: bool) -> Result<()> {
                self.removed.lock().unwrap().push(name.to_string());
                Ok(())
            }
            async fn image_build(&self, _c: Vec<u8>, _o: &ImageBuildOptions) -> Result<String> {
                Ok(String::new())
            }
            async fn image_inspect(&self, _r: &str) -> Result<ImageInspect> {
                Ok(ImageInspect::default())
            }
            async fn image_save(&self, _r: &str) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            async fn container_create(&self, _s: &PhaseContainerSpec) -> Result<String> {
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
            async fn copy_to(&self, _id: &str, _h: &Path, _c: &str) -> Result<()> {
                Ok(())
            }
            async fn copy_from(&self, _id: &str, _c: &str, _h: &Path) -> Result<()> {
                Ok(())
            }
        }

        let daemon = RecordingDaemon { removed: Mutex::new(Vec::new()) };
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

        rt.block_on(async {
            Cache::Image("index.docker.io/acme/cache".to_string()).clear(&daemon).await.unwrap();
            assert!(daemon.removed.lock().unwrap().is_empty());

            Cache::Volume("pack-build-cache".to_string()).clear(&daemon).await.unwrap();
            assert_eq!(daemon.removed.lock().unwrap().as_slice(), &["pack-build-cache".to_string()]);
        });
    }
}
