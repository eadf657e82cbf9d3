use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, info};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::config::DelayConfig;
use crate::controller::RunController;
use crate::delay_manager;
use crate::fetcher::PageFetcher;
use crate::queue::RegionQueue;
use crate::resume_manager::ProgressState;
use crate::scraper::{RegionOutcome, RegionReport, RegionScraper};

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub regions: Vec<RegionReport>,
    /// Workers that died without a report.
    pub crashed_workers: usize,
}

impl RunSummary {
    pub fn count(&self, outcome: RegionOutcome) -> usize {
        self.regions.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn report(&self, region: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region == region)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Regions processed: {}", self.regions.len())?;
        for outcome in [
            RegionOutcome::Exhausted,
            RegionOutcome::Saturated,
            RegionOutcome::Skipped,
            RegionOutcome::Stopped,
            RegionOutcome::Failed,
        ] {
            let count = self.count(outcome);
            if count > 0 {
                writeln!(f, "  {:<10} {}", outcome, count)?;
            }
        }
        if self.crashed_workers > 0 {
            writeln!(f, "  crashed    {}", self.crashed_workers)?;
        }
        for report in &self.regions {
            writeln!(
                f,
                "  - {}: {} after {} attempt(s), {} new, {} duplicates, {} rejected",
                report.region, report.outcome, report.attempts, report.accepted, report.duplicates, report.rejected
            )?;
        }
        Ok(())
    }
}

/// Runs regions in batches of at most `concurrency`, waiting for each batch
/// to finish before the next one starts.
pub struct Scheduler<F: PageFetcher + 'static> {
    scraper: Arc<RegionScraper<F>>,
    controller: Arc<RunController>,
    concurrency: usize,
    delays: DelayConfig,
    progress: Mutex<ProgressState>,
}

impl<F: PageFetcher + 'static> Scheduler<F> {
    pub fn new(
        scraper: Arc<RegionScraper<F>>,
        controller: Arc<RunController>,
        concurrency: usize,
        delays: DelayConfig,
        progress: ProgressState,
    ) -> Self {
        Scheduler {
            scraper,
            controller,
            concurrency: concurrency.max(1),
            delays,
            progress: Mutex::new(progress),
        }
    }

    pub async fn run(&self, queue: Arc<RegionQueue>) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut batch_number = 0;
        info!(
            "Run {} starting: {} region(s), {} at a time.",
            self.controller.run_id(),
            queue.len(),
            self.concurrency
        );

        loop {
            if !self.controller.wait_until_running().await {
                info!("Run stopped. {} region(s) left in queue.", queue.len());
                break;
            }

            let batch = queue.front_batch(self.concurrency);
            if batch.is_empty() {
                break;
            }
            batch_number += 1;
            info!("Batch {}: {}", batch_number, batch.join(", "));

            let mut workers = JoinSet::new();
            for region in batch.iter().cloned() {
                let scraper = self.scraper.clone();
                workers.spawn(async move { scraper.run(&region).await });
            }

            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(report) => {
                        if report.outcome.is_complete() {
                            self.progress
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .mark_complete(&report.region);
                        }
                        summary.regions.push(report);
                    }
                    Err(e) => {
                        self.controller.stats().record_error();
                        summary.crashed_workers += 1;
                        error!("Region worker crashed: {}", e);
                    }
                }
            }
            queue.complete(&batch);

            if queue.is_empty() || self.controller.is_stopped() {
                continue;
            }
            delay_manager::batch_delay(&self.delays, self.controller.shutdown_token()).await;
        }

        info!("Scraping finished. Total in file: {}", self.controller.stats().snapshot().total_records);
        summary
    }
}
