mod cli;
mod logging;

use clap::Parser;
use cli::Cli;
use lco_core::docker::CliContainerDaemon;
use lco_core::scheduler;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    logging::init()?;

    let args = Cli::parse();
    let builder_supported = args.builder_supported_versions()?;
    let opts = args.into_options()?;

    let daemon = CliContainerDaemon::new();
    let tmp_dir = tempfile::tempdir()?;

    let result = scheduler::run(&daemon, &opts, tmp_dir.path(), &builder_supported).await?;

    tracing::info!(
        platform = %result.platform_version,
        phases = result.phases.len(),
        "run completed"
    );
    for phase in &result.phases {
        println!("{}: exit {}", phase.phase, phase.exit_code);
    }
    if let Some(run_image) = &result.extended_run_image {
        println!("extended run image: {run_image}");
    }

    Ok(())
}
