use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide counters, shared by every region worker.
#[derive(Debug, Default)]
pub struct RunStats {
    total_records: AtomicU64,
    new_records: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    /// One per failed region attempt.
    errors: AtomicU64,
    /// Region restarts actually performed; the last failed attempt of a
    /// region that gives up adds to `errors` only.
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_records: u64,
    pub new_records: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub errors: u64,
    pub retries: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total to the number of records already on disk.
    pub fn seed_total(&self, existing: u64) {
        self.total_records.store(existing, Ordering::SeqCst);
    }

    pub fn record_accepted(&self) {
        self.new_records.fetch_add(1, Ordering::SeqCst);
        self.total_records.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the run-wide duplicate count including this one.
    pub fn record_duplicate(&self) -> u64 {
        self.duplicates.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_records: self.total_records.load(Ordering::SeqCst),
            new_records: self.new_records.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total records : {}", self.total_records)?;
        writeln!(f, "New this run  : {}", self.new_records)?;
        writeln!(f, "Duplicates    : {}", self.duplicates)?;
        writeln!(f, "Rejected      : {}", self.rejected)?;
        writeln!(f, "Errors        : {}", self.errors)?;
        write!(f, "Restarts      : {}", self.retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn accepted_moves_both_totals() {
        let stats = RunStats::new();
        stats.seed_total(10);
        stats.record_accepted();
        let snap = stats.snapshot();
        assert_eq!(snap.total_records, 11);
        assert_eq!(snap.new_records, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = Arc::new(RunStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_duplicate();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.duplicates(), 8000);
    }

    #[test]
    fn report_labels_retries_as_restarts() {
        let stats = RunStats::new();
        stats.record_error();
        stats.record_retry();
        stats.record_error();
        let text = stats.snapshot().to_string();
        assert!(text.contains("Errors        : 2"));
        assert!(text.contains("Restarts      : 1"));
    }
}
