// ABOUTME: Controller entry point - runs test executables in a freshly launched agent
// ABOUTME: Prints progress events as they arrive, then the terminal result nodes

use agency::cli::RunArgs;
use agency::driver::{self, Mode};
use agency::logging;
use agency_core::{paths, Agency, AgencyConfig};
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = logging::init_controller(&paths::log_dir());
    dotenvy::dotenv().ok();

    let args = RunArgs::parse();
    let mut config = AgencyConfig::load()?;
    if let Some(install_dir) = &args.install_dir {
        config.install_dir = install_dir.clone();
    }
    tracing::info!(
        name = %config.name,
        install_dir = %config.install_dir.display(),
        files = args.files.len(),
        "Configuration loaded"
    );

    let mode = if args.explore { Mode::Explore } else { Mode::Run };
    let listener = |report: &str| println!("{}", report);

    let mut agency = Agency::start(config)?;
    let outcome = driver::drive(&agency, &args.package(), &args.filter(), mode, &listener).await;
    agency.stop().await;

    for node in outcome?.nodes {
        println!("{}", node);
    }
    Ok(())
}
