use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{DelayConfig, HarvestConfig, ScrapeLimits};
use crate::controller::{Flow, RunController};
use crate::delay_manager;
use crate::error::Result;
use crate::fetcher::PageFetcher;
use crate::input_loader::RegionSource;
use crate::record::InsertOutcome;
use crate::record_store::RecordStore;

/// How a region's scrape ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionOutcome {
    /// No new cards after repeated scrolling.
    Exhausted,
    /// The run-wide duplicate ceiling was reached in this region.
    Saturated,
    Skipped,
    Stopped,
    /// Every attempt failed.
    Failed,
}

impl RegionOutcome {
    /// Whether a later run can leave this region out.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            RegionOutcome::Exhausted | RegionOutcome::Saturated | RegionOutcome::Skipped
        )
    }
}

impl fmt::Display for RegionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RegionOutcome::Exhausted => "exhausted",
            RegionOutcome::Saturated => "saturated",
            RegionOutcome::Skipped => "skipped",
            RegionOutcome::Stopped => "stopped",
            RegionOutcome::Failed => "failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub region: String,
    pub outcome: RegionOutcome,
    pub attempts: u32,
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub extraction_faults: u64,
    pub write_errors: u64,
    pub cards_seen: usize,
}

impl RegionReport {
    fn new(region: &str) -> Self {
        RegionReport {
            region: region.to_string(),
            outcome: RegionOutcome::Failed,
            attempts: 0,
            accepted: 0,
            duplicates: 0,
            rejected: 0,
            extraction_faults: 0,
            write_errors: 0,
            cards_seen: 0,
        }
    }
}

/// Counts listing rounds in which the feed did not grow.
#[derive(Debug)]
pub struct ExhaustionTracker {
    limit: u32,
    best: usize,
    stagnant: u32,
}

impl ExhaustionTracker {
    pub fn new(limit: u32) -> Self {
        ExhaustionTracker {
            limit,
            best: 0,
            stagnant: 0,
        }
    }

    /// Records one round's visible card count. Returns `true` once `limit`
    /// consecutive rounds brought nothing beyond the best count so far.
    pub fn observe(&mut self, visible: usize) -> bool {
        if visible > self.best {
            self.best = visible;
            self.stagnant = 0;
        } else {
            self.stagnant += 1;
        }
        self.stagnant >= self.limit
    }

    pub fn stagnant_rounds(&self) -> u32 {
        self.stagnant
    }
}

/// Drives one region at a time through its feed, retrying with a fresh
/// session when an attempt fails.
pub struct RegionScraper<F: PageFetcher> {
    fetcher: Arc<F>,
    store: Arc<RecordStore>,
    controller: Arc<RunController>,
    source: RegionSource,
    limits: ScrapeLimits,
    delays: DelayConfig,
}

impl<F: PageFetcher> RegionScraper<F> {
    pub fn new(
        fetcher: Arc<F>,
        store: Arc<RecordStore>,
        controller: Arc<RunController>,
        config: &HarvestConfig,
    ) -> Result<Self> {
        Ok(RegionScraper {
            fetcher,
            store,
            controller,
            source: RegionSource::new(config.url_template.clone())?,
            limits: config.limits.clone(),
            delays: config.delays.clone(),
        })
    }

    pub async fn run(&self, region: &str) -> RegionReport {
        self.controller.enter_region(region);
        let url = self.source.query_url(region);
        let mut report = RegionReport::new(region);
        info!("Searching in: {}", region);

        let outcome = loop {
            // A pause or skip that lands during backoff must hold before the next open.
            match self.controller.checkpoint(region).await {
                Flow::Continue => {}
                Flow::Skip => break RegionOutcome::Skipped,
                Flow::Stop => break RegionOutcome::Stopped,
            }
            report.attempts += 1;
            match self.attempt(region, &url, &mut report).await {
                Ok(outcome) => break outcome,
                Err(e) => {
                    self.controller.stats().record_error();
                    error!(
                        "Region {} attempt {}/{} failed: {}",
                        region, report.attempts, self.limits.max_attempts, e
                    );
                    if self.controller.is_stopped() {
                        break RegionOutcome::Stopped;
                    }
                    if report.attempts >= self.limits.max_attempts {
                        break RegionOutcome::Failed;
                    }
                    self.controller.stats().record_retry();
                    let cancel = self.controller.shutdown_token();
                    if !delay_manager::retry_delay(&self.delays, report.attempts, cancel).await {
                        break RegionOutcome::Stopped;
                    }
                }
            }
        };

        report.outcome = outcome;
        self.controller.leave_region(region);
        match outcome {
            RegionOutcome::Failed => error!(
                "Giving up on {} after {} attempts.",
                region, report.attempts
            ),
            _ => info!(
                "Finished {} ({}): {} new, {} duplicates, {} rejected.",
                region, outcome, report.accepted, report.duplicates, report.rejected
            ),
        }
        report
    }

    /// One pass over the region with its own session. The session is closed
    /// on every exit path.
    async fn attempt(&self, region: &str, url: &str, report: &mut RegionReport) -> Result<RegionOutcome> {
        let token = self.controller.open_session(region);
        let opened = match guarded(&token, self.fetcher.open(url)).await {
            Some(opened) => opened,
            None => {
                self.controller.release_session(region);
                return Ok(RegionOutcome::Stopped);
            }
        };
        let mut session = match opened {
            Ok(session) => session,
            Err(e) => {
                self.controller.release_session(region);
                return Err(e);
            }
        };

        let result = self.drive(region, &mut session, &token, report).await;

        self.fetcher.close(session).await;
        self.controller.release_session(region);
        result
    }

    async fn drive(
        &self,
        region: &str,
        session: &mut F::Session,
        token: &CancellationToken,
        report: &mut RegionReport,
    ) -> Result<RegionOutcome> {
        let consent_wait = Duration::from_millis(self.delays.consent_timeout_ms);
        match tokio::time::timeout(consent_wait, guarded(token, self.fetcher.dismiss_consent(session))).await {
            Ok(Some(())) => {}
            Ok(None) => return Ok(RegionOutcome::Stopped),
            Err(_) => debug!("No consent form handled within {:?} for {}", consent_wait, region),
        }

        let mut tracker = ExhaustionTracker::new(self.limits.stagnant_rounds);
        let mut processed: HashSet<String> = HashSet::new();
        let mut rounds: u32 = 0;

        loop {
            match self.controller.checkpoint(region).await {
                Flow::Continue => {}
                Flow::Skip => return Ok(RegionOutcome::Skipped),
                Flow::Stop => return Ok(RegionOutcome::Stopped),
            }

            let cards = match guarded(token, self.fetcher.list_cards(session)).await {
                Some(cards) => cards?,
                None => return Ok(RegionOutcome::Stopped),
            };
            report.cards_seen = report.cards_seen.max(cards.len());
            if tracker.observe(cards.len()) {
                info!(
                    "No new results in {} after {} rounds.",
                    region,
                    tracker.stagnant_rounds()
                );
                return Ok(RegionOutcome::Exhausted);
            }

            for card in &cards {
                if processed.contains(&card.id) {
                    continue;
                }
                match self.controller.checkpoint(region).await {
                    Flow::Continue => {}
                    Flow::Skip => return Ok(RegionOutcome::Skipped),
                    Flow::Stop => return Ok(RegionOutcome::Stopped),
                }
                processed.insert(card.id.clone());

                let listing = match guarded(token, self.fetcher.extract(session, card)).await {
                    Some(Some(listing)) => listing,
                    Some(None) => {
                        report.extraction_faults += 1;
                        debug!("Could not read card #{} ({}) in {}", card.index, card.id, region);
                        continue;
                    }
                    None => return Ok(RegionOutcome::Stopped),
                };

                match self.store.try_insert(listing, region) {
                    Ok(InsertOutcome::Accepted(record)) => {
                        report.accepted += 1;
                        info!(
                            "Saved '{}' ({}). Total: {}",
                            record.name,
                            region,
                            self.controller.stats().snapshot().total_records
                        );
                    }
                    Ok(InsertOutcome::Duplicate) => {
                        report.duplicates += 1;
                        let run_duplicates = self.controller.stats().duplicates();
                        if run_duplicates >= self.limits.duplicate_ceiling {
                            warn!(
                                "Duplicate ceiling reached ({} this run) while in {}. Moving on.",
                                run_duplicates, region
                            );
                            return Ok(RegionOutcome::Saturated);
                        }
                    }
                    Ok(InsertOutcome::Rejected(reason)) => {
                        report.rejected += 1;
                        debug!("Ignored card {} in {}: {}", card.id, region, reason);
                    }
                    Err(e) => {
                        report.write_errors += 1;
                        error!("Could not save listing from {}: {}", region, e);
                    }
                }
            }

            rounds += 1;
            if self.limits.max_scroll_rounds.map_or(false, |max| rounds >= max) {
                info!("Scroll limit reached for {} after {} rounds.", region, rounds);
                return Ok(RegionOutcome::Exhausted);
            }

            match self.controller.checkpoint(region).await {
                Flow::Continue => {}
                Flow::Skip => return Ok(RegionOutcome::Skipped),
                Flow::Stop => return Ok(RegionOutcome::Stopped),
            }
            match guarded(token, self.fetcher.scroll_more(session)).await {
                Some(scrolled) => scrolled?,
                None => return Ok(RegionOutcome::Stopped),
            }
            if !delay_manager::scroll_delay(&self.delays, self.controller.shutdown_token()).await {
                return Ok(RegionOutcome::Stopped);
            }
        }
    }
}

/// Runs a fetcher call unless the session is force-closed first.
async fn guarded<T>(token: &CancellationToken, call: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        value = call => Some(value),
    }
}
