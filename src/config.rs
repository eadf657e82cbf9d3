use std::fs;
use std::path::{Path, PathBuf};

use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Placeholder substituted with the URL-encoded region name.
pub const QUERY_PLACEHOLDER: &str = "{query}";

const DEFAULT_URL_TEMPLATE: &str =
    "https://www.google.fr/maps/search/salle+de+jeu+et+de+divertissement+{query}";

const DEFAULT_REGIONS: [&str; 20] = [
    "Paris",
    "Marseille",
    "Lyon",
    "Toulouse",
    "Nice",
    "Nantes",
    "Strasbourg",
    "Montpellier",
    "Bordeaux",
    "Lille",
    "Rennes",
    "Reims",
    "Le Havre",
    "Saint-Étienne",
    "Toulon",
    "Grenoble",
    "Dijon",
    "Angers",
    "Nîmes",
    "Villeurbanne",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub output_path: PathBuf,
    /// Completed-region ledger. `None` disables resume.
    pub progress_path: Option<PathBuf>,
    pub url_template: String,
    pub regions: Vec<String>,
    /// CSV or XLSX file with a `City`/`Region` column; replaces `regions`.
    pub regions_file: Option<PathBuf>,
    pub concurrency: usize,
    pub limits: ScrapeLimits,
    pub delays: DelayConfig,
    pub fetcher: FetcherConfig,
    /// Names produced by results-summary pseudo-cards.
    pub sentinel_names: Vec<String>,
    pub log_level: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            output_path: PathBuf::from("establishments.csv"),
            progress_path: Some(PathBuf::from("progress.json")),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            regions_file: None,
            concurrency: 2,
            limits: ScrapeLimits::default(),
            delays: DelayConfig::default(),
            fetcher: FetcherConfig::default(),
            sentinel_names: vec!["Résultats".to_string(), "Results".to_string()],
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeLimits {
    /// Attempts per region, the first one included.
    pub max_attempts: u32,
    /// Consecutive listing rounds without card growth before a region is exhausted.
    pub stagnant_rounds: u32,
    /// Run-wide duplicate count that stops the region being processed.
    pub duplicate_ceiling: u64,
    pub max_scroll_rounds: Option<u32>,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        ScrapeLimits {
            max_attempts: 3,
            stagnant_rounds: 3,
            duplicate_ceiling: 50,
            max_scroll_rounds: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub scroll_base_ms: u64,
    pub scroll_jitter_ms: u64,
    pub batch_min_ms: u64,
    pub batch_max_ms: u64,
    pub retry_base_ms: u64,
    pub consent_timeout_ms: u64,
    pub pause_poll_ms: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            scroll_base_ms: 2000,
            scroll_jitter_ms: 1500,
            batch_min_ms: 4000,
            batch_max_ms: 12000,
            retry_base_ms: 1000,
            consent_timeout_ms: 5000,
            pause_poll_ms: 500,
        }
    }
}

impl DelayConfig {
    /// No waiting anywhere. Used by tests and dry runs.
    pub fn immediate() -> Self {
        DelayConfig {
            scroll_base_ms: 0,
            scroll_jitter_ms: 0,
            batch_min_ms: 0,
            batch_max_ms: 0,
            retry_base_ms: 0,
            consent_timeout_ms: 1000,
            pause_poll_ms: 5,
        }
    }
}

/// Settings for the bundled HTTP fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub navigation_timeout_secs: u64,
    pub card_selector: String,
    pub title_selector: String,
    pub info_selector: String,
    pub website_selector: String,
    pub next_page_selector: String,
    /// Form whose submission declines the consent interstitial.
    pub consent_selector: String,
    /// Word that marks an info line as an address, besides a postal code.
    pub country_hint: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            accept_language: "fr-FR,fr;q=0.9,en;q=0.8".to_string(),
            navigation_timeout_secs: 15,
            card_selector: "a.result-card".to_string(),
            title_selector: "h1".to_string(),
            info_selector: ".info-line".to_string(),
            website_selector: "a.website".to_string(),
            next_page_selector: "a[rel=next]".to_string(),
            consent_selector: "form.consent-reject".to_string(),
            country_hint: "France".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Reads a JSON config file, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = fs::read_to_string(path)?;
                let config: HarvestConfig = serde_json::from_str(&content)
                    .map_err(|e| HarvestError::Config(format!("{:?}: {}", path, e)))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            None => HarvestConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HarvestError::Config("concurrency must be at least 1".into()));
        }
        if self.limits.max_attempts == 0 {
            return Err(HarvestError::Config("limits.max_attempts must be at least 1".into()));
        }
        if self.limits.stagnant_rounds == 0 {
            return Err(HarvestError::Config("limits.stagnant_rounds must be at least 1".into()));
        }
        if self.url_template.matches(QUERY_PLACEHOLDER).count() != 1 {
            return Err(HarvestError::Config(format!(
                "url_template must contain {} exactly once",
                QUERY_PLACEHOLDER
            )));
        }
        if self.delays.batch_min_ms > self.delays.batch_max_ms {
            return Err(HarvestError::Config("delays.batch_min_ms exceeds delays.batch_max_ms".into()));
        }
        if self.regions.is_empty() && self.regions_file.is_none() {
            return Err(HarvestError::Config("no regions configured".into()));
        }
        Ok(())
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}
