//! Run-wide lifecycle options
//!
//! [`LifecycleOptions`] is the single value the CLI layer builds from parsed
//! arguments and hands to [`crate::scheduler`]. Everything downstream
//! (cache resolution, phase config, default-process-type selection) reads
//! from this struct rather than re-deriving its own view of user input.

use crate::phase_cache::{Cache, CacheSelector};
use crate::platform_api::PlatformVersion;
use std::collections::HashMap;
use std::path::PathBuf;

/// How generated layers should be written out: as a running container's
/// filesystem (the default) or as an OCI image layout on disk (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    #[default]
    Container,
    OciLayout,
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub app_dir: PathBuf,
    pub builder_image: String,
    pub run_image: Option<String>,
    pub target_image: String,
    pub previous_image: Option<String>,
    pub cache_image: Option<String>,
    pub publish: bool,
    pub clear_cache: bool,
    pub skip_restore: bool,
    pub use_creator: bool,
    pub default_process_type: Option<String>,
    pub layout_mode: LayoutMode,
    pub env: HashMap<String, String>,
    pub build_cache: CacheSelector,
    pub launch_cache: CacheSelector,
    pub lifecycle_image: Option<String>,
    pub lifecycle_supported_apis: Vec<String>,
}

impl LifecycleOptions {
    /// Validate the registry-level invariant that the target image and a
    /// given previous image, if set, must publish to the same registry
    /// (§8 P4, §7 class 1).
    pub fn validate_registries(&self) -> crate::errors::Result<()> {
        use crate::errors::{ConfigError, OrchestratorError};
        use crate::registry_parser::parse_registry_reference;

        if let Some(previous) = &self.previous_image {
            let (target_registry, ..) = parse_registry_reference(&self.target_image)
                .map_err(|e| {
                    OrchestratorError::Config(ConfigError::InvalidReference {
                        reference: self.target_image.clone(),
                        reason: e.to_string(),
                    })
                })?;
            let (previous_registry, ..) = parse_registry_reference(previous).map_err(|e| {
                OrchestratorError::Config(ConfigError::InvalidReference {
                    reference: previous.clone(),
                    reason: e.to_string(),
                })
            })?;
            if self.publish && target_registry != previous_registry {
                return Err(OrchestratorError::Config(ConfigError::RegistryMismatch {
                    image_registry: target_registry,
                    previous_registry,
                }));
            }
        }
        Ok(())
    }
}

/// Determine the default process type per §4.8 (P7): if `provided` is empty
/// and the negotiated platform falls in `[0.4, 0.6)`, default to `"web"`;
/// otherwise pass `provided` through unchanged (including empty, which emits
/// no `-process-type` flag at all).
pub fn determine_default_process_type(
    provided: Option<&str>,
    platform: PlatformVersion,
) -> Option<String> {
    match provided {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ if platform.at_least(0, 4) && platform.less_than(0, 6) => Some("web".to_string()),
        _ => None,
    }
}

/// Apply the layout-mode rule (§4.9): extensions force container mode
/// because kaniko needs a writable layer filesystem to snapshot; absent
/// extensions, the caller's requested mode is honored unchanged.
pub fn apply_layout_mode(requested: LayoutMode, has_extensions: bool) -> LayoutMode {
    if has_extensions {
        LayoutMode::Container
    } else {
        requested
    }
}

/// Resolve both caches for a run in one call, matching the ordering used by
/// the scheduler: build cache first (it may be constrained by extensions),
/// then launch cache.
pub fn resolve_caches(
    opts: &LifecycleOptions,
    has_extensions: bool,
    default_volume_prefix: &str,
) -> crate::errors::Result<(Cache, Cache)> {
    let build = opts.build_cache.resolve_build_cache(
        has_extensions,
        &format!("{default_volume_prefix}-build-cache"),
    )?;
    let launch = opts
        .launch_cache
        .resolve_launch_cache(&format!("{default_volume_prefix}-launch-cache"))?;
    Ok((build, launch))
}

/// The orchestrator's own supported Platform API range, exposed here so
/// callers building `LifecycleOptions` can report it without reaching into
/// [`crate::platform_api`] directly.
pub fn tool_supported_versions() -> &'static [PlatformVersion] {
    crate::platform_api::TOOL_SUPPORTED
}
