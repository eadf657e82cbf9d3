use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::HarvestConfig;
use crate::controller::RunController;
use crate::error::Result;
use crate::fetcher::PageFetcher;
use crate::http_fetcher::HttpFetcher;
use crate::input_loader;
use crate::queue::RegionQueue;
use crate::record_store::RecordStore;
use crate::resume_manager::ProgressState;
use crate::scheduler::{RunSummary, Scheduler};
use crate::scraper::RegionScraper;
use crate::stats::RunStats;

/// Everything one run needs, wired together from a config.
pub struct Harvest<F: PageFetcher + 'static> {
    pub controller: Arc<RunController>,
    pub store: Arc<RecordStore>,
    pub queue: Arc<RegionQueue>,
    scheduler: Scheduler<F>,
}

impl Harvest<HttpFetcher> {
    pub fn prepare(config: &HarvestConfig, fresh: bool) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.fetcher)?;
        Harvest::with_fetcher(config, fresh, fetcher)
    }
}

impl<F: PageFetcher + 'static> Harvest<F> {
    /// Loads regions, the record log and the progress ledger. Regions the
    /// ledger marks complete are left out unless `fresh` is set.
    pub fn with_fetcher(config: &HarvestConfig, fresh: bool, fetcher: F) -> Result<Self> {
        config.validate()?;
        let regions = input_loader::resolve_regions(config)?;

        let stats = Arc::new(RunStats::new());
        let store = Arc::new(RecordStore::open(
            &config.output_path,
            &config.sentinel_names,
            stats.clone(),
        )?);

        let progress = match (&config.progress_path, fresh) {
            (Some(path), false) => ProgressState::load(path),
            (Some(path), true) => {
                info!("Fresh run: ignoring {:?}", path);
                ProgressState::load(path).cleared()
            }
            (None, _) => ProgressState::disabled(),
        };
        let pending: Vec<String> = regions.into_iter().filter(|r| !progress.contains(r)).collect();
        let queue = Arc::new(RegionQueue::new(pending));

        let controller = Arc::new(
            RunController::new(stats, queue.clone())
                .with_poll_interval(Duration::from_millis(config.delays.pause_poll_ms.max(1))),
        );
        let scraper = Arc::new(RegionScraper::new(
            Arc::new(fetcher),
            store.clone(),
            controller.clone(),
            config,
        )?);
        let scheduler = Scheduler::new(
            scraper,
            controller.clone(),
            config.concurrency,
            config.delays.clone(),
            progress,
        );

        Ok(Harvest {
            controller,
            store,
            queue,
            scheduler,
        })
    }

    pub async fn run(&self) -> RunSummary {
        self.scheduler.run(self.queue.clone()).await
    }
}
