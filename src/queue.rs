use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

/// FIFO of region names, each present at most once.
///
/// Regions are read from the front in batches and only removed once their
/// scrape has finished.
#[derive(Debug, Default)]
pub struct RegionQueue {
    regions: Mutex<VecDeque<String>>,
}

impl RegionQueue {
    /// Builds the queue, dropping blanks and later repeats of a name.
    pub fn new<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let regions = regions
            .into_iter()
            .map(|r| r.into().trim().to_string())
            .filter(|r| !r.is_empty() && seen.insert(r.clone()))
            .collect();
        RegionQueue {
            regions: Mutex::new(regions),
        }
    }

    /// The next `size` regions, left in place.
    pub fn front_batch(&self, size: usize) -> Vec<String> {
        self.lock().iter().take(size).cloned().collect()
    }

    /// Removes finished regions.
    pub fn complete(&self, finished: &[String]) {
        self.lock().retain(|r| !finished.contains(r));
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.regions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
