use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the harvester library.
///
/// Per-card extraction faults never reach this type at the scraper level: the
/// fetcher reports them as `None` and the card is skipped.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("extraction failed for card {card}: {reason}")]
    Extraction { card: String, reason: String },

    #[error("failed to append to record log {path:?}: {source}")]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to load record log {path:?}: {source}")]
    StorageLoad {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        HarvestError::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;
