use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use bib_sensor::config::{Args, Config};
use bib_sensor::shutdown;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::from_args(args).context("invalid configuration")?;

    info!("bib-sensor {} starting", env!("CARGO_PKG_VERSION"));
    info!("  Poll interval: {:?}", config.poll_interval);
    info!("  Log interval: {:?}", config.log_interval);
    info!("  Data dir: {}", config.data_dir.display());
    info!("  Sensor timeout: {:?}", config.sensor_timeout);
    for slot in &config.primary_sensors {
        info!("  Primary sensor: {} ({})", slot.label(), slot);
    }
    if config.simulate {
        info!("  Simulated sensors enabled");
    }

    let summary = shutdown::run(config).await?;
    std::process::exit(summary.status.code());
}
