use clap::Parser;
use lco_core::options::{LayoutMode, LifecycleOptions};
use lco_core::phase_cache::CacheSelector;
use lco_core::platform_api::PlatformVersion;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version,
    about = "Runs the Cloud Native Buildpacks lifecycle against a container daemon"
)]
pub struct Cli {
    /// Directory containing the application source.
    #[arg(long, default_value = ".")]
    pub app_dir: PathBuf,

    /// Builder image reference.
    #[arg(long)]
    pub builder_image: String,

    /// Run image reference; defaults to the one recorded in the builder's metadata.
    #[arg(long)]
    pub run_image: Option<String>,

    /// Reference the built image is tagged and optionally published as.
    #[arg(long)]
    pub target_image: String,

    /// Reference of a previously built image, used to reuse layers.
    #[arg(long)]
    pub previous_image: Option<String>,

    /// Registry image used as the build cache.
    #[arg(long)]
    pub cache_image: Option<String>,

    /// Named volume used as the build cache.
    #[arg(long)]
    pub cache_volume: Option<String>,

    /// Host path bind-mounted as the build cache.
    #[arg(long)]
    pub cache_bind: Option<String>,

    /// Named volume used as the launch cache.
    #[arg(long)]
    pub launch_cache_volume: Option<String>,

    /// Push the target image to its registry after building.
    #[arg(long)]
    pub publish: bool,

    /// Clear the build cache before running.
    #[arg(long)]
    pub clear_cache: bool,

    /// Skip the restore phase (assumes no cached layers are usable).
    #[arg(long)]
    pub skip_restore: bool,

    /// Use the single consolidated creator phase instead of discrete phases.
    /// Not valid when the builder applies extensions.
    #[arg(long)]
    pub use_creator: bool,

    /// Override the default process type recorded at export time.
    #[arg(long)]
    pub default_process_type: Option<String>,

    /// Write layers to an OCI image layout instead of the daemon's image store.
    #[arg(long)]
    pub oci_layout: bool,

    /// Environment variables passed through to every phase, `KEY=VALUE`.
    #[arg(long = "env", value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Platform API versions the builder image advertises, e.g. `0.10`.
    #[arg(long = "builder-supports", value_delimiter = ',')]
    pub builder_supports: Vec<String>,
}

fn parse_env_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid --env value '{raw}', expected KEY=VALUE"))
}

impl Cli {
    pub fn into_options(self) -> anyhow::Result<LifecycleOptions> {
        let layout_mode = if self.oci_layout {
            LayoutMode::OciLayout
        } else {
            LayoutMode::Container
        };

        Ok(LifecycleOptions {
            app_dir: self.app_dir,
            builder_image: self.builder_image,
            run_image: self.run_image,
            target_image: self.target_image,
            previous_image: self.previous_image,
            cache_image: self.cache_image.clone(),
            publish: self.publish,
            clear_cache: self.clear_cache,
            skip_restore: self.skip_restore,
            use_creator: self.use_creator,
            default_process_type: self.default_process_type,
            layout_mode,
            env: self.env.into_iter().collect::<HashMap<_, _>>(),
            build_cache: CacheSelector {
                image: self.cache_image,
                volume: self.cache_volume,
                bind: self.cache_bind,
            },
            launch_cache: CacheSelector {
                image: None,
                volume: self.launch_cache_volume,
                bind: None,
            },
            lifecycle_image: None,
            lifecycle_supported_apis: Vec::new(),
        })
    }

    pub fn builder_supported_versions(&self) -> anyhow::Result<Vec<PlatformVersion>> {
        self.builder_supports
            .iter()
            .map(|raw| raw.parse::<PlatformVersion>().map_err(anyhow::Error::from))
            .collect()
    }
}
