//! Phase scheduling
//!
//! Drives a full run end to end. Before anything else starts a container,
//! the builder image's metadata label is inspected (a plain `docker
//! inspect`, not a container) to learn whether it declares any extensions
//! at all — this gates the creator branch's hard error (§4.6 Branch A,
//! Scenario 6) and the detector's generated-Dockerfile copy-out, without
//! ever starting a container that the run is about to reject.
//!
//! Two branches:
//!
//! - **Branch A (creator):** `use_creator` set and the builder declares no
//!   extensions. A single consolidated creator phase handles
//!   detect/analyze/restore/build/export internally; exactly one container
//!   runs (§8 P2).
//! - **Branch B (discrete phases):** detect and analyze, in an order that
//!   depends on the negotiated platform version (`< 0.7`:
//!   detect → analyze; `>= 0.7`: analyze → detect, §4.6 step 1/1′),
//!   then restore, then a 6-step table: (1) extensions inspection from
//!   `group.toml`/`analyzed.toml`, (2) build-kind extension application if
//!   any, (3) build and run-kind extension application running
//!   concurrently, (4) export, (5) cleanup. Whether extension application
//!   happens daemon-side or via an in-container extender phase is gated on
//!   `opts.publish` (§4.6 steps 3/5).
//!
//! Step 3's two halves (running the build phase, and applying run-kind
//! extensions to produce the export-time run image) have no data
//! dependency on each other and are driven concurrently with `tokio::join!`;
//! either failing surfaces without waiting out the slower half.

use crate::auth::ImageRole;
use crate::daemon_extender;
use crate::docker::ContainerDaemon;
use crate::errors::{ConfigError, OrchestratorError, Result};
use crate::extensions;
use crate::mount_paths::MountPaths;
use crate::options::{apply_layout_mode, determine_default_process_type, resolve_caches, LifecycleOptions};
use crate::phase_cache::Cache;
use crate::phase_config::{self, ExtenderKind};
use crate::phase_runner::{run_phase, PhaseOutcome};
use crate::platform_api::{negotiate, PlatformVersion};
use crate::run_state::RunState;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Everything a completed run produced, for the CLI layer to report.
#[derive(Debug)]
pub struct RunResult {
    pub platform_version: PlatformVersion,
    pub phases: Vec<PhaseOutcome>,
    pub extended_run_image: Option<String>,
}

/// Run the full lifecycle for `opts` against `daemon`, using `tmp_dir` as
/// scratch space for copy-outs and extension Dockerfiles.
#[instrument(skip(daemon, opts))]
pub async fn run(
    daemon: &dyn ContainerDaemon,
    opts: &LifecycleOptions,
    tmp_dir: &Path,
    builder_supported: &[PlatformVersion],
) -> Result<RunResult> {
    opts.validate_registries()?;

    let platform_version = negotiate(builder_supported, &opts.lifecycle_supported_apis)?;
    info!(platform = %platform_version, "negotiated platform API version");

    let mut run_state = RunState::new();
    run_state.set_tmp_dir(tmp_dir.to_path_buf());

    let os = crate::mount_paths::ContainerOs::Linux;
    let paths = MountPaths::new(os, opts.app_dir.to_str());

    let result = run_inner(daemon, opts, &paths, platform_version, tmp_dir, &mut run_state).await;

    let cleanup_result = run_state.cleanup(daemon).await;
    match (result, cleanup_result) {
        (Ok(r), Ok(())) => Ok(r),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Err(run_err), _) => Err(run_err),
    }
}

async fn run_inner(
    daemon: &dyn ContainerDaemon,
    opts: &LifecycleOptions,
    paths: &MountPaths,
    platform_version: PlatformVersion,
    tmp_dir: &Path,
    run_state: &mut RunState,
) -> Result<RunResult> {
    let builder_inspect = daemon.image_inspect(&opts.builder_image).await?;
    let builder_declares_extensions = extensions::builder_declares_extensions(&builder_inspect.labels);

    if opts.use_creator {
        if builder_declares_extensions {
            // No container has started yet: the hard error is raised purely
            // from the builder's metadata label (§4.6 Branch A, Scenario 6).
            return Err(OrchestratorError::Config(ConfigError::CreatorWithExtensions));
        }
        return run_creator_branch(daemon, opts, paths, platform_version, run_state).await;
    }

    run_discrete_branch(
        daemon,
        opts,
        paths,
        platform_version,
        tmp_dir,
        run_state,
        builder_declares_extensions,
    )
    .await
}

async fn run_creator_branch(
    daemon: &dyn ContainerDaemon,
    opts: &LifecycleOptions,
    paths: &MountPaths,
    platform_version: PlatformVersion,
    run_state: &mut RunState,
) -> Result<RunResult> {
    let (build_cache, launch_cache) = allocate_caches(daemon, opts, false, run_state).await?;

    let default_process_type =
        determine_default_process_type(opts.default_process_type.as_deref(), platform_version);

    let registry_auth_refs = registry_auth_refs(opts);

    let creator_config = phase_config::creator(
        &opts.builder_image,
        paths,
        platform_version,
        &build_cache,
        &launch_cache,
        &opts.target_image,
        opts.run_image.as_deref(),
        opts.previous_image.as_deref(),
        default_process_type.as_deref(),
        opts.publish,
        &registry_auth_refs,
    );
    let creator_outcome = run_phase(daemon, creator_config).await?;

    Ok(RunResult {
        platform_version,
        phases: vec![creator_outcome],
        extended_run_image: None,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_discrete_branch(
    daemon: &dyn ContainerDaemon,
    opts: &LifecycleOptions,
    paths: &MountPaths,
    platform_version: PlatformVersion,
    tmp_dir: &Path,
    run_state: &mut RunState,
    builder_declares_extensions: bool,
) -> Result<RunResult> {
    let mut phases = Vec::new();

    let detect_config = || {
        phase_config::detect(&opts.builder_image, paths, platform_version, tmp_dir, builder_declares_extensions)
    };
    let analyze_config = || {
        phase_config::analyze(
            &opts.builder_image,
            paths,
            platform_version,
            &opts.target_image,
            opts.previous_image.as_deref(),
            opts.run_image.as_deref(),
            tmp_dir,
        )
    };

    // §4.6 step 1/1′: platform < 0.7 runs detect before analyze; modern
    // platforms invert the order (Scenario 2).
    if platform_version.less_than(0, 7) {
        phases.push(run_phase(daemon, detect_config()).await?);
        phases.push(run_phase(daemon, analyze_config()).await?);
    } else {
        phases.push(run_phase(daemon, analyze_config()).await?);
        phases.push(run_phase(daemon, detect_config()).await?);
    }

    let group_toml_bytes = std::fs::read(tmp_dir.join("group.toml")).map_err(OrchestratorError::Io)?;
    let analyzed_toml_bytes = std::fs::read(tmp_dir.join("analyzed.toml")).map_err(OrchestratorError::Io)?;
    let extensions_info = extensions::inspect(tmp_dir, &group_toml_bytes, Some(&analyzed_toml_bytes))?;

    let (build_cache, launch_cache) =
        allocate_caches(daemon, opts, extensions_info.has_extensions_for_build(), run_state).await?;

    // §4.6 step 2: restore is skipped outright when clearing the cache on a
    // pre-0.10 platform (there would be nothing left to restore); on newer
    // platforms restore still runs but passes `-skip-layers`.
    let skip_restore = opts.skip_restore || (opts.clear_cache && platform_version.less_than(0, 10));
    if !skip_restore {
        let restore_config = phase_config::restore(
            &opts.builder_image,
            paths,
            platform_version,
            &build_cache,
            opts.clear_cache,
            extensions_info.has_extensions_for_build(),
            extensions_info.has_extensions_for_run(),
        );
        phases.push(run_phase(daemon, restore_config).await?);
    }

    let registry_auth_refs = registry_auth_refs(opts);

    // Step 2/3: apply build-kind extensions, either via the daemon (local
    // runs) or an in-container extender phase (publish runs), before the
    // build phase, since its image argument depends on the result.
    let build_image = if extensions_info.has_extensions_for_build() {
        if opts.publish {
            let extender_config = phase_config::extender(
                &opts.builder_image,
                paths,
                platform_version,
                ExtenderKind::Build,
                &build_cache,
            );
            phases.push(run_phase(daemon, extender_config).await?);
            None
        } else {
            Some(
                daemon_extender::apply_build_extensions(
                    daemon,
                    &opts.builder_image,
                    &extensions_info.build_dockerfiles,
                    "lco-extended-build",
                )
                .await?,
            )
        }
    } else {
        None
    };

    let run_image = extensions_info.run_image_after_extensions(
        opts.run_image.as_deref().unwrap_or(&opts.builder_image),
    );

    let build_config =
        phase_config::build_phase(&opts.builder_image, paths, platform_version, &build_cache, build_image.as_deref());

    // Step 3: the build phase and run-kind extension application have no
    // data dependency on each other, so they're driven concurrently rather
    // than sequentially; a failure in either surfaces without waiting for
    // the slower of the two.
    let (build_result, run_kind_result, extended_run_image_dir) = if extensions_info.has_extensions_for_run() {
        if opts.publish {
            let extender_config = phase_config::extender(
                &run_image,
                paths,
                platform_version,
                ExtenderKind::Run,
                &build_cache,
            );
            let (build_result, extend_result) = tokio::join!(run_phase(daemon, build_config), run_phase(daemon, extender_config));
            phases.push(extend_result?);
            (build_result, None, None)
        } else {
            let extend = daemon_extender::extend_run_image(
                daemon,
                &run_image,
                extensions_info.run_dockerfiles.clone(),
                tmp_dir,
                "lco-extended-run",
            );
            let (build_result, extend_result) = tokio::join!(run_phase(daemon, build_config), extend);
            let (extended_tag, export_dir) = extend_result?;
            (build_result, Some(extended_tag), Some(export_dir))
        }
    } else {
        (run_phase(daemon, build_config).await, None, None)
    };

    phases.push(build_result?);

    // Step 4/5: export against whichever run image extensions settled on.
    let export_run_image = run_kind_result.clone().unwrap_or(run_image);
    let default_process_type = determine_default_process_type(opts.default_process_type.as_deref(), platform_version);
    let layout_mode = apply_layout_mode(opts.layout_mode, extensions_info.has_extensions_for_build());
    info!(?layout_mode, "export layout mode resolved");

    let export_config = phase_config::export(
        &opts.builder_image,
        paths,
        platform_version,
        &opts.target_image,
        &export_run_image,
        &launch_cache,
        default_process_type.as_deref(),
        opts.publish,
        extended_run_image_dir.as_deref(),
        &registry_auth_refs,
    );
    phases.push(run_phase(daemon, export_config).await?);

    Ok(RunResult {
        platform_version,
        phases,
        extended_run_image: run_kind_result,
    })
}

/// The registry credentials a publishing phase needs, covering every image
/// role this run touches. Returned empty (and therefore a no-op) when not
/// publishing; callers still gate on `opts.publish` before using it.
fn registry_auth_refs(opts: &LifecycleOptions) -> Vec<(ImageRole, String)> {
    if !opts.publish {
        return Vec::new();
    }
    let mut refs = vec![(ImageRole::Target, opts.target_image.clone())];
    if let Some(run_image) = &opts.run_image {
        refs.push((ImageRole::RunImage, run_image.clone()));
    }
    if let Some(cache_image) = &opts.cache_image {
        refs.push((ImageRole::CacheImage, cache_image.clone()));
    }
    if let Some(previous_image) = &opts.previous_image {
        refs.push((ImageRole::PreviousImage, previous_image.clone()));
    }
    refs
}

async fn allocate_caches(
    daemon: &dyn ContainerDaemon,
    opts: &LifecycleOptions,
    has_extensions: bool,
    run_state: &mut RunState,
) -> Result<(Cache, Cache)> {
    let (build_cache, launch_cache) = resolve_caches(opts, has_extensions, "lco")?;

    if opts.clear_cache {
        build_cache.clear(daemon).await?;
    }

    for cache in [&build_cache, &launch_cache] {
        if let Cache::Volume(name) = cache {
            if !volume_was_explicitly_requested(opts, name) {
                daemon.volume_create(name).await?;
                run_state.own_volume(name.clone());
            }
        }
    }

    Ok((build_cache, launch_cache))
}

fn volume_was_explicitly_requested(opts: &LifecycleOptions, name: &str) -> bool {
    opts.build_cache.volume.as_deref() == Some(name) || opts.launch_cache.volume.as_deref() == Some(name)
}
