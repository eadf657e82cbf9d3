use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use listing_harvester_lib::controller::HELP;
use listing_harvester_lib::{console, logger, Harvest, HarvestConfig};

#[derive(Parser, Debug)]
#[command(name = "listing-harvester", version, about = "Harvest business listings city by city")]
struct Cli {
    /// JSON config file; defaults apply to anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV or XLSX file with a City column, replacing the configured regions
    #[arg(long)]
    regions_file: Option<PathBuf>,

    /// Record log to append to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Regions scraped in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Ignore the progress file and scrape every region again
    #[arg(long)]
    fresh: bool,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut HarvestConfig) {
        if let Some(path) = self.regions_file {
            config.regions_file = Some(path);
        }
        if let Some(path) = self.output {
            config.output_path = path;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let fresh = cli.fresh;
    let mut config = HarvestConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);

    logger::init(config.log_level());
    info!("Starting Listing Harvester...");

    let harvest = Harvest::prepare(&config, fresh).context("preparing run")?;
    if harvest.queue.is_empty() {
        warn!("Every region is already complete. Use --fresh to start over.");
        return Ok(());
    }

    println!("{}", HELP);
    if let Err(e) = console::spawn(harvest.controller.clone()) {
        error!("Console unavailable, running without operator commands: {}", e);
    }

    let summary = harvest.run().await;

    println!("\n{}", summary);
    println!("{}", harvest.controller.stats().snapshot());
    info!("Output written to {:?}", harvest.store.path());
    Ok(())
}
