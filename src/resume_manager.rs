use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::{Deserialize, Serialize};

/// Regions finished in earlier runs, persisted as JSON so a restarted run
/// can skip them.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ProgressState {
    pub completed_regions: BTreeSet<String>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ProgressState {
    /// A ledger that remembers nothing across runs.
    pub fn disabled() -> Self {
        ProgressState::default()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!("No progress file found. Starting fresh.");
            return ProgressState {
                path: Some(path),
                ..ProgressState::default()
            };
        }

        let mut state = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ProgressState>(&content) {
                Ok(state) => {
                    info!(
                        "Resumed previous session: {} regions already completed.",
                        state.completed_regions.len()
                    );
                    state
                }
                Err(e) => {
                    error!("Failed to parse progress file: {}. Starting fresh.", e);
                    ProgressState::default()
                }
            },
            Err(e) => {
                error!("Failed to read progress file: {}", e);
                ProgressState::default()
            }
        };
        state.path = Some(path);
        state
    }

    /// Forgets every completed region but keeps writing to the same file.
    pub fn cleared(mut self) -> Self {
        self.completed_regions.clear();
        self
    }

    pub fn mark_complete(&mut self, region: &str) {
        if self.completed_regions.insert(region.to_string()) {
            self.save();
        }
    }

    pub fn contains(&self, region: &str) -> bool {
        self.completed_regions.contains(region)
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let json = match serde_json::to_string_pretty(self) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize progress state: {}", e);
                return;
            }
        };

        // Written beside the target and renamed, so a crash never leaves a
        // half-written ledger.
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, json).and_then(|_| fs::rename(&tmp, path)) {
            error!("Failed to write progress file {:?}: {}", path, e);
        }
    }
}
