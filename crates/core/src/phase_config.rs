//! Phase container configuration
//!
//! Each lifecycle phase (detect/analyze/restore/build/export, or the
//! consolidated creator) is described as a plain [`PhaseConfig`] value built
//! by folding a list of small operation functions over a base config. This
//! mirrors the composable build-options pattern used elsewhere in this crate
//! for assembling CLI argument lists, generalized to the phase contracts in
//! §4.7: flags, positional args, env vars and mounts are each appended by a
//! dedicated `with_*` function, and `cond` applies an operation only when a
//! platform-version or option predicate holds.

use crate::auth::{registry_auth_env, ImageRole};
use crate::docker::PhaseContainerSpec;
use crate::mount_paths::MountPaths;
use crate::phase_cache::Cache;
use crate::platform_api::PlatformVersion;
use std::path::{Path, PathBuf};

/// Which side of an extension application an in-container extender phase
/// runs: the build-time order, or the run-image order (`-kind run`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtenderKind {
    Build,
    Run,
}

/// A fully-built phase container plus the host-side copy-out list the
/// runner must execute after the phase container exits successfully.
#[derive(Debug, Clone)]
pub struct PhaseConfig {
    pub phase: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<String>,
    pub network: Option<String>,
    pub privileged: bool,
    pub user: Option<String>,
    /// (container path, host destination) pairs copied out after the phase
    /// container exits zero, e.g. `/layers/analyzed.toml`.
    pub copy_out: Vec<(String, PathBuf)>,
}

impl PhaseConfig {
    pub fn new(phase: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            image: image.into(),
            args: Vec::new(),
            env: Vec::new(),
            binds: Vec::new(),
            network: None,
            privileged: false,
            user: None,
            copy_out: Vec::new(),
        }
    }

    pub fn into_container_spec(self) -> PhaseContainerSpec {
        PhaseContainerSpec {
            image: self.image,
            args: self.args,
            env: self.env,
            binds: self.binds,
            network: self.network,
            privileged: self.privileged,
            user: self.user,
        }
    }
}

/// An operation that transforms a [`PhaseConfig`] in place.
pub type Operation = Box<dyn FnOnce(PhaseConfig) -> PhaseConfig>;

/// Fold a list of operations over a base config, left to right.
pub fn build(base: PhaseConfig, ops: Vec<Operation>) -> PhaseConfig {
    ops.into_iter().fold(base, |cfg, op| op(cfg))
}

pub fn with_flag(flag: impl Into<String>) -> Operation {
    let flag = flag.into();
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.args.push(flag);
        cfg
    })
}

pub fn with_arg(flag: impl Into<String>, value: impl Into<String>) -> Operation {
    let (flag, value) = (flag.into(), value.into());
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.args.push(flag);
        cfg.args.push(value);
        cfg
    })
}

pub fn with_env(key: impl Into<String>, value: impl Into<String>) -> Operation {
    let (key, value) = (key.into(), value.into());
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.env.push((key, value));
        cfg
    })
}

pub fn with_bind(mount_spec: impl Into<String>) -> Operation {
    let mount_spec = mount_spec.into();
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.binds.push(mount_spec);
        cfg
    })
}

pub fn with_copy_out(container_path: impl Into<String>, host_dest: PathBuf) -> Operation {
    let container_path = container_path.into();
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.copy_out.push((container_path, host_dest));
        cfg
    })
}

pub fn with_network(network: impl Into<String>) -> Operation {
    let network = network.into();
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.network = Some(network);
        cfg
    })
}

pub fn with_user(user: impl Into<String>) -> Operation {
    let user = user.into();
    Box::new(move |mut cfg: PhaseConfig| {
        cfg.user = Some(user);
        cfg
    })
}

/// Apply `op` only when `pred` holds; otherwise the config passes through
/// unchanged. Mirrors the spec's `If(pred, op)` combinator.
pub fn cond(pred: bool, op: Operation) -> Operation {
    if pred {
        op
    } else {
        Box::new(|cfg| cfg)
    }
}

fn noop() -> Operation {
    Box::new(|cfg| cfg)
}

fn cache_bind(cache: &Cache, target: &str) -> Operation {
    match cache {
        Cache::Volume(name) => with_bind(format!("type=volume,source={name},target={target}")),
        Cache::Bind(path) => with_bind(format!("type=bind,source={path},target={target}")),
        Cache::Image(_) => noop(),
    }
}

/// Build-cache-as-registry-image is passed by flag rather than mount.
fn cache_image_arg(cache: &Cache, flag: &str) -> Operation {
    match cache {
        Cache::Image(reference) => with_arg(flag, reference.clone()),
        _ => Box::new(|cfg| cfg),
    }
}

/// Base operations shared by every phase: the app-dir and layers-dir
/// mounts, and the `-log-level`/`-platform` flags every lifecycle binary
/// accepts.
fn common_ops(image: &str, paths: &MountPaths, platform: PlatformVersion) -> Vec<Operation> {
    vec![
        with_bind(format!(
            "type=bind,source={workspace},target={app_dir}",
            workspace = "${WORKSPACE_HOST_PATH}",
            app_dir = paths.app_dir()
        )),
        with_bind(format!(
            "type=volume,source={volume},target={layers_dir}",
            volume = format!("{image}-layers"),
            layers_dir = paths.layers_dir()
        )),
        with_arg("-app", paths.app_dir()),
        with_arg("-layers", paths.layers_dir()),
        with_arg("-platform", platform.to_string()),
    ]
}

pub fn detect(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    tmp_dir: &Path,
    builder_declares_extensions: bool,
) -> PhaseConfig {
    let mut ops = common_ops(builder_image, paths, platform);
    ops.push(with_flag("/cnb/lifecycle/detector"));
    ops.push(cond(
        builder_declares_extensions && platform.at_least(0, 10),
        with_env("CNB_EXPERIMENTAL_MODE", "warn"),
    ));
    ops.push(with_copy_out("/layers/group.toml", tmp_dir.join("group.toml")));
    ops.push(with_copy_out("/layers/analyzed.toml", tmp_dir.join("analyzed.toml")));
    ops.push(cond(
        builder_declares_extensions,
        with_copy_out("/layers/generated/build", tmp_dir.join("generated").join("build")),
    ));
    ops.push(cond(
        builder_declares_extensions,
        with_copy_out("/layers/generated/run", tmp_dir.join("generated").join("run")),
    ));
    build(PhaseConfig::new("detect", builder_image), ops)
}

#[allow(clippy::too_many_arguments)]
pub fn analyze(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    target_image: &str,
    previous_image: Option<&str>,
    run_image: Option<&str>,
    tmp_dir: &Path,
) -> PhaseConfig {
    let mut ops = common_ops(builder_image, paths, platform);
    ops.push(with_flag("/cnb/lifecycle/analyzer"));
    ops.push(cond(
        previous_image.is_some(),
        with_arg("-previous-image", previous_image.unwrap_or_default().to_string()),
    ));
    ops.push(cond(
        run_image.is_some(),
        with_arg("-run-image", run_image.unwrap_or_default().to_string()),
    ));
    ops.push(with_flag(target_image.to_string()));
    ops.push(with_copy_out("/layers/analyzed.toml", tmp_dir.join("analyzed.toml")));
    build(PhaseConfig::new("analyze", builder_image), ops)
}

#[allow(clippy::too_many_arguments)]
pub fn restore(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    build_cache: &Cache,
    skip_layers: bool,
    has_extensions_for_build: bool,
    has_extensions_for_run: bool,
) -> PhaseConfig {
    let extensions_apply = (has_extensions_for_build && platform.at_least(0, 10))
        || ((has_extensions_for_build || has_extensions_for_run) && platform.at_least(0, 12));

    let mut ops = common_ops(builder_image, paths, platform);
    ops.push(cache_bind(build_cache, paths.cache_dir()));
    ops.push(with_flag("/cnb/lifecycle/restorer"));
    ops.push(with_arg("-cache-dir", paths.cache_dir()));
    ops.push(cache_image_arg(build_cache, "-cache-image"));
    ops.push(cond(skip_layers, with_flag("-skip-layers")));
    ops.push(cond(extensions_apply, with_arg("-build-image", builder_image.to_string())));
    ops.push(cond(extensions_apply, cache_bind(build_cache, paths.kaniko_cache_dir())));
    build(PhaseConfig::new("restore", builder_image), ops)
}

#[allow(clippy::too_many_arguments)]
pub fn build_phase(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    build_cache: &Cache,
    extended_image: Option<&str>,
) -> PhaseConfig {
    let image = extended_image.unwrap_or(builder_image);
    let mut ops = common_ops(image, paths, platform);
    ops.push(cache_bind(build_cache, paths.cache_dir()));
    ops.push(with_flag("/cnb/lifecycle/builder"));
    build(PhaseConfig::new("build", image), ops)
}

/// Build the in-container extender phase (§4.6 steps 3/5, §4.7 "extender").
/// Only invoked in publish mode; non-publish extension application goes
/// through [`crate::daemon_extender`] instead. `kind` selects which side of
/// the image this invocation extends: [`ExtenderKind::Build`] extends the
/// builder image used by the `build` phase, [`ExtenderKind::Run`] extends
/// the run image and passes `-kind run`.
pub fn extender(
    image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    kind: ExtenderKind,
    build_cache: &Cache,
) -> PhaseConfig {
    let mut ops = common_ops(image, paths, platform);
    ops.push(with_flag("/cnb/lifecycle/extender"));
    ops.push(cond(kind == ExtenderKind::Run, with_arg("-kind", "run")));
    ops.push(with_env("CNB_EXPERIMENTAL_MODE", "warn"));
    ops.push(with_user("root"));
    ops.push(cache_bind(build_cache, paths.kaniko_cache_dir()));
    let phase_name = match kind {
        ExtenderKind::Build => "extender-build",
        ExtenderKind::Run => "extender-run",
    };
    build(PhaseConfig::new(phase_name, image), ops)
}

#[allow(clippy::too_many_arguments)]
pub fn export(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    target_image: &str,
    run_image: &str,
    launch_cache: &Cache,
    default_process_type: Option<&str>,
    publish: bool,
    extended_run_image_dir: Option<&Path>,
    registry_auth_refs: &[(ImageRole, String)],
) -> PhaseConfig {
    let mut ops = common_ops(builder_image, paths, platform);
    ops.push(cache_bind(launch_cache, paths.launch_cache_dir()));
    ops.push(with_flag("/cnb/lifecycle/exporter"));
    ops.push(with_arg("-launch-cache", paths.launch_cache_dir()));
    ops.push(with_arg("-run-image", run_image.to_string()));
    ops.push(cond(
        default_process_type.is_some(),
        with_arg("-process-type", default_process_type.unwrap_or_default().to_string()),
    ));
    if let Some(dir) = extended_run_image_dir {
        ops.push(with_bind(format!(
            "type=bind,source={},target={}",
            dir.display(),
            paths.extended_new_dir()
        )));
        ops.push(with_env("CNB_EXTENDED_DIR", paths.extended_new_dir()));
    }
    ops.push(cond(publish, with_flag("-daemon=false")));
    ops.push(cond(!publish, with_flag("-daemon")));
    if publish && !registry_auth_refs.is_empty() {
        let (key, value) = registry_auth_env(registry_auth_refs);
        ops.push(with_env(key, value));
    }
    ops.push(with_flag(target_image.to_string()));
    build(PhaseConfig::new("export", builder_image), ops)
}

#[allow(clippy::too_many_arguments)]
pub fn creator(
    builder_image: &str,
    paths: &MountPaths,
    platform: PlatformVersion,
    build_cache: &Cache,
    launch_cache: &Cache,
    target_image: &str,
    run_image: Option<&str>,
    previous_image: Option<&str>,
    default_process_type: Option<&str>,
    publish: bool,
    registry_auth_refs: &[(ImageRole, String)],
) -> PhaseConfig {
    let mut ops = common_ops(builder_image, paths, platform);
    ops.push(cache_bind(build_cache, paths.cache_dir()));
    ops.push(cache_bind(launch_cache, paths.launch_cache_dir()));
    ops.push(with_flag("/cnb/lifecycle/creator"));
    ops.push(with_arg("-cache-dir", paths.cache_dir()));
    ops.push(with_arg("-launch-cache", paths.launch_cache_dir()));
    ops.push(cond(
        run_image.is_some(),
        with_arg("-run-image", run_image.unwrap_or_default().to_string()),
    ));
    ops.push(cond(
        previous_image.is_some(),
        with_arg("-previous-image", previous_image.unwrap_or_default().to_string()),
    ));
    ops.push(cond(
        default_process_type.is_some(),
        with_arg("-process-type", default_process_type.unwrap_or_default().to_string()),
    ));
    ops.push(cond(publish, with_flag("-daemon=false")));
    ops.push(cond(!publish, with_flag("-daemon")));
    if publish && !registry_auth_refs.is_empty() {
        let (key, value) = registry_auth_env(registry_auth_refs);
        ops.push(with_env(key, value));
    }
    ops.push(with_flag(target_image.to_string()));
    build(PhaseConfig::new("creator", builder_image), ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_paths::ContainerOs;

    #[test]
    fn creator_rejects_when_not_applicable_is_caller_responsibility() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let cfg = creator(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            &Cache::Volume("build-cache".to_string()),
            &Cache::Volume("launch-cache".to_string()),
            "index.docker.io/acme/app",
            None,
            None,
            Some("web"),
            false,
            &[],
        );
        assert!(cfg.args.contains(&"/cnb/lifecycle/creator".to_string()));
        assert!(cfg.args.contains(&"-process-type".to_string()));
        assert!(cfg.args.contains(&"index.docker.io/acme/app".to_string()));
    }

    #[test]
    fn analyze_omits_previous_image_flag_when_absent() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let tmp_dir = tempfile::tempdir().unwrap();
        let cfg = analyze(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 10),
            "index.docker.io/acme/app",
            None,
            None,
            tmp_dir.path(),
        );
        assert!(!cfg.args.contains(&"-previous-image".to_string()));
    }

    #[test]
    fn detect_copies_out_into_tmp_dir() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let tmp_dir = tempfile::tempdir().unwrap();
        let cfg = detect("builder:latest", &paths, PlatformVersion::new(0, 10), tmp_dir.path(), false);
        assert_eq!(cfg.copy_out[0].1, tmp_dir.path().join("group.toml"));
        assert_eq!(cfg.copy_out[1].1, tmp_dir.path().join("analyzed.toml"));
        assert_eq!(cfg.copy_out.len(), 2);
    }

    #[test]
    fn detect_copies_out_generated_dirs_only_when_builder_declares_extensions() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let tmp_dir = tempfile::tempdir().unwrap();
        let cfg = detect("builder:latest", &paths, PlatformVersion::new(0, 10), tmp_dir.path(), true);
        assert_eq!(cfg.copy_out.len(), 4);
        assert!(cfg.copy_out.iter().any(|(p, _)| p == "/layers/generated/build"));
        assert!(cfg.copy_out.iter().any(|(p, _)| p == "/layers/generated/run"));
        assert!(cfg.env.iter().any(|(k, v)| k == "CNB_EXPERIMENTAL_MODE" && v == "warn"));
    }

    #[test]
    fn restore_binds_volume_cache_to_cache_dir() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let cfg = restore(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 10),
            &Cache::Volume("v".to_string()),
            false,
            false,
            false,
        );
        assert!(cfg.binds.iter().any(|b| b.contains("source=v") && b.contains("target=/cache")));
        assert!(!cfg.args.contains(&"-build-image".to_string()));
    }

    #[test]
    fn restore_passes_skip_layers_flag_when_requested() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let cfg = restore(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 10),
            &Cache::Volume("v".to_string()),
            true,
            false,
            false,
        );
        assert!(cfg.args.contains(&"-skip-layers".to_string()));
    }

    #[test]
    fn restore_passes_build_image_and_kaniko_bind_when_extensions_apply() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let cfg = restore(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            &Cache::Volume("v".to_string()),
            false,
            true,
            false,
        );
        assert!(cfg.args.contains(&"-build-image".to_string()));
        assert!(cfg.binds.iter().any(|b| b.contains("target=/kaniko/cache")));
    }

    #[test]
    fn extender_run_kind_passes_kind_flag() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let cfg = extender(
            "run:latest",
            &paths,
            PlatformVersion::new(0, 12),
            ExtenderKind::Run,
            &Cache::Volume("v".to_string()),
        );
        assert!(cfg.args.windows(2).any(|w| w == ["-kind", "run"]));
        assert_eq!(cfg.user.as_deref(), Some("root"));

        let build_cfg = extender(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            ExtenderKind::Build,
            &Cache::Volume("v".to_string()),
        );
        assert!(!build_cfg.args.contains(&"-kind".to_string()));
    }

    #[test]
    fn export_sets_daemon_flag_based_on_publish() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let published = export(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 10),
            "t",
            "r",
            &Cache::Volume("l".to_string()),
            None,
            true,
            None,
            &[],
        );
        assert!(published.args.contains(&"-daemon=false".to_string()));

        let local = export(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 10),
            "t",
            "r",
            &Cache::Volume("l".to_string()),
            None,
            false,
            None,
            &[],
        );
        assert!(local.args.contains(&"-daemon".to_string()));
    }

    #[test]
    fn export_binds_extended_run_image_dir_when_present() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let extended_dir = tempfile::tempdir().unwrap();
        let cfg = export(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            "t",
            "r",
            &Cache::Volume("l".to_string()),
            None,
            false,
            Some(extended_dir.path()),
            &[],
        );
        assert!(cfg.env.iter().any(|(k, _)| k == "CNB_EXTENDED_DIR"));
        assert!(cfg
            .binds
            .iter()
            .any(|b| b.contains(&extended_dir.path().display().to_string())));
    }

    #[test]
    fn export_adds_registry_auth_env_only_when_publishing() {
        let paths = MountPaths::new(ContainerOs::Linux, None);
        let refs = vec![(ImageRole::Target, "index.docker.io/acme/app".to_string())];
        let published = export(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            "t",
            "r",
            &Cache::Volume("l".to_string()),
            None,
            true,
            None,
            &refs,
        );
        assert!(published.env.iter().any(|(k, _)| k == "CNB_REGISTRY_AUTH"));

        let local = export(
            "builder:latest",
            &paths,
            PlatformVersion::new(0, 12),
            "t",
            "r",
            &Cache::Volume("l".to_string()),
            None,
            false,
            None,
            &refs,
        );
        assert!(!local.env.iter().any(|(k, _)| k == "CNB_REGISTRY_AUTH"));
    }
}
