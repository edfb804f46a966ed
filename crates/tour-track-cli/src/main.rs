//! Headless driver for the tour track geometry pipeline

mod loader;
mod logging;
mod settings;
mod simulation;

use clap::Parser;
use settings::Settings;

fn main() -> anyhow::Result<()> {
    logging::setup_logging();
    let settings = Settings::parse();
    tracing::debug!(?settings, "Parsed settings");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(simulation::run(settings))
}
