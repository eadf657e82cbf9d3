pub mod config;
pub mod console;
pub mod controller;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod harvest;
pub mod http_fetcher;
pub mod input_loader;
pub mod logger;
pub mod queue;
pub mod record;
pub mod record_store;
pub mod resume_manager;
pub mod scheduler;
pub mod scraper;
pub mod stats;

// Exporting types for convenience
pub use config::HarvestConfig;
pub use controller::{Command, RunController};
pub use error::{HarvestError, Result};
pub use fetcher::{CardRef, PageFetcher};
pub use harvest::Harvest;
pub use http_fetcher::HttpFetcher;
pub use queue::RegionQueue;
pub use record::{ExtractedListing, InsertOutcome, Record, RejectReason};
pub use record_store::RecordStore;
pub use resume_manager::ProgressState;
pub use scheduler::{RunSummary, Scheduler};
pub use scraper::{RegionOutcome, RegionReport, RegionScraper};
pub use stats::{RunStats, StatsSnapshot};
