use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::SecondsFormat;
use log::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::record::{ExtractedListing, InsertOutcome, Record, RecordKey, RejectReason, LOG_COLUMNS};
use crate::stats::RunStats;

/// Append-only, deduplicated ledger of listings backed by a CSV log.
///
/// The duplicate check and the append happen under the same lock, so two
/// workers can never both accept the same key.
pub struct RecordStore {
    path: PathBuf,
    sentinels: Vec<String>,
    stats: Arc<RunStats>,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    keys: HashSet<RecordKey>,
    // Column order of the file being appended to; older logs may lack `website`.
    columns: Vec<String>,
    file: File,
}

impl RecordStore {
    /// Loads the log at `path` (creating it with a header row when missing or
    /// empty) and seeds the run's total with the number of stored records.
    pub fn open<P: AsRef<Path>>(path: P, sentinels: &[String], stats: Arc<RunStats>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (keys, columns) = if path.exists() && fs::metadata(&path)?.len() > 0 {
            let (keys, columns) = load_keys(&path)?;
            info!("Loaded {} existing records from {:?}", keys.len(), path);
            (keys, columns)
        } else {
            let mut writer = csv::Writer::from_path(&path).map_err(|source| HarvestError::StorageWrite {
                path: path.clone(),
                source,
            })?;
            writer
                .write_record(LOG_COLUMNS)
                .and_then(|_| writer.flush().map_err(csv::Error::from))
                .map_err(|source| HarvestError::StorageWrite {
                    path: path.clone(),
                    source,
                })?;
            info!("No record log found. Created {:?}", path);
            (HashSet::new(), LOG_COLUMNS.iter().map(|c| c.to_string()).collect())
        };

        let file = OpenOptions::new().append(true).open(&path)?;

        stats.seed_total(keys.len() as u64);

        Ok(RecordStore {
            path,
            sentinels: sentinels.to_vec(),
            stats,
            inner: Mutex::new(StoreInner { keys, columns, file }),
        })
    }

    /// Validates, deduplicates and durably appends one listing.
    ///
    /// A write failure counts as a run error and leaves the key absent, so a
    /// later sighting of the same listing can still be stored.
    pub fn try_insert(&self, listing: ExtractedListing, city: &str) -> Result<InsertOutcome> {
        if let Some(reason) = self.validate(&listing) {
            self.stats.record_rejected();
            debug!("Rejected listing '{}' in {}: {}", listing.name, city, reason);
            return Ok(InsertOutcome::Rejected(reason));
        }

        let key = RecordKey::new(&listing.name, &listing.address);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.keys.contains(&key) {
            self.stats.record_duplicate();
            debug!("Already stored: {} ({})", key, city);
            return Ok(InsertOutcome::Duplicate);
        }

        let record = Record::capture(listing, city);
        if let Err(source) = inner.append(&record) {
            self.stats.record_error();
            return Err(HarvestError::StorageWrite {
                path: self.path.clone(),
                source,
            });
        }
        inner.keys.insert(key);
        self.stats.record_accepted();
        Ok(InsertOutcome::Accepted(record))
    }

    fn validate(&self, listing: &ExtractedListing) -> Option<RejectReason> {
        if listing.name.trim().is_empty() {
            Some(RejectReason::EmptyName)
        } else if listing.address.trim().is_empty() {
            Some(RejectReason::EmptyAddress)
        } else if self.sentinels.iter().any(|s| s == listing.name.trim()) {
            Some(RejectReason::Placeholder)
        } else {
            None
        }
    }

    pub fn contains(&self, name: &str, address: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.keys.contains(&RecordKey::new(name, address))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> HashSet<RecordKey> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).keys.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreInner {
    /// Writes one complete row or nothing: a failed write is cut back to
    /// the previous end of file so no partial bytes survive.
    fn append(&mut self, record: &Record) -> std::result::Result<(), csv::Error> {
        let row = self.encode(record)?;
        let end = self.file.metadata()?.len();
        if let Err(e) = self.file.write_all(&row).and_then(|_| self.file.flush()) {
            if let Err(cut) = self.file.set_len(end) {
                warn!("Could not roll back a failed append: {}", cut);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn encode(&self, record: &Record) -> std::result::Result<Vec<u8>, csv::Error> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(self.columns.iter().map(|column| field(record, column)))?;
        writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
    }
}

fn field(record: &Record, column: &str) -> String {
    match column {
        "name" => record.name.clone(),
        "phone" => record.phone.clone(),
        "address" => record.address.clone(),
        "city" => record.city.clone(),
        "website" => record.website.clone().unwrap_or_default(),
        "scraped_at" => record.scraped_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        _ => String::new(),
    }
}

/// Reads every well-formed record of a log file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).map_err(|source| HarvestError::StorageLoad {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for row in reader.deserialize::<Record>() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping unreadable row in {:?}: {}", path, e),
        }
    }
    Ok(records)
}

/// Builds the key set from an existing log, repairing a torn final row.
fn load_keys(path: &Path) -> Result<(HashSet<RecordKey>, Vec<String>)> {
    let load_err = |source: csv::Error| HarvestError::StorageLoad {
        path: path.to_path_buf(),
        source,
    };

    let data = fs::read(path)?;
    let mut reader = csv::ReaderBuilder::new().from_reader(data.as_slice());
    let headers = reader.headers().map_err(load_err)?.clone();
    for required in ["name", "address"] {
        if !headers.iter().any(|h| h == required) {
            return Err(HarvestError::Config(format!(
                "{:?} is not a record log (missing '{}' column)",
                path, required
            )));
        }
    }

    let mut keys = HashSet::new();
    let mut row = csv::StringRecord::new();
    // Byte offset and line of the most recent unparsable row, while it is
    // still the last row seen.
    let mut trailing_bad: Option<(u64, u64)> = None;

    loop {
        let start = reader.position().clone();
        let parsed = match reader.read_record(&mut row) {
            Ok(false) => break,
            Ok(true) => row.deserialize::<Record>(Some(&headers)).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(record) => {
                if let Some((_, line)) = trailing_bad.take() {
                    warn!("Skipping malformed row at line {} of {:?}", line, path);
                }
                keys.insert(record.key());
            }
            Err(reason) => {
                if let Some((_, line)) = trailing_bad.take() {
                    warn!("Skipping malformed row at line {} of {:?}", line, path);
                }
                debug!("Unparsable row at line {}: {}", start.line(), reason);
                trailing_bad = Some((start.byte(), start.line()));
            }
        }
    }

    if let Some((offset, line)) = trailing_bad {
        warn!(
            "Discarding incomplete trailing row at line {} of {:?} (interrupted write)",
            line, path
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset)?;
        file.sync_all()?;
    } else if data.last().is_some_and(|b| *b != b'\n') {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
    }

    let columns = headers.iter().map(|h| h.to_string()).collect();
    Ok((keys, columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sentinels() -> Vec<String> {
        vec!["Résultats".to_string()]
    }

    fn listing(name: &str, address: &str) -> ExtractedListing {
        ExtractedListing::new(name, "04 78 00 00 00", address)
    }

    #[test]
    fn second_insert_of_same_key_is_duplicate() {
        let dir = tempdir().unwrap();
        let stats = Arc::new(RunStats::new());
        let store = RecordStore::open(dir.path().join("log.csv"), &sentinels(), stats.clone()).unwrap();

        let first = store.try_insert(listing("Bowling X", "1 rue A"), "Lyon").unwrap();
        assert!(matches!(first, InsertOutcome::Accepted(_)));
        let second = store.try_insert(listing("Bowling X", "1 rue A"), "Lyon").unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);

        assert_eq!(store.len(), 1);
        assert_eq!(read_records(store.path()).unwrap().len(), 1);
        let snap = stats.snapshot();
        assert_eq!((snap.total_records, snap.new_records, snap.duplicates), (1, 1, 1));
    }

    #[test]
    fn invalid_listings_are_never_accepted() {
        let dir = tempdir().unwrap();
        let stats = Arc::new(RunStats::new());
        let store = RecordStore::open(dir.path().join("log.csv"), &sentinels(), stats.clone()).unwrap();

        let cases = [
            (listing("", "2 rue B"), RejectReason::EmptyName),
            (listing("   ", "2 rue B"), RejectReason::EmptyName),
            (listing("Arcade Y", ""), RejectReason::EmptyAddress),
            (listing("Résultats", "3 rue C, 75001 Paris"), RejectReason::Placeholder),
        ];
        for (candidate, reason) in cases {
            assert_eq!(store.try_insert(candidate, "Paris").unwrap(), InsertOutcome::Rejected(reason));
        }
        assert!(store.is_empty());
        assert_eq!(stats.snapshot().rejected, 4);
        assert_eq!(stats.snapshot().duplicates, 0);
    }

    #[test]
    fn reload_reproduces_key_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let expected = {
            let store = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
            store.try_insert(listing("A", "1 rue A"), "Lyon").unwrap();
            store.try_insert(listing("B", "2 rue B"), "Nice").unwrap();
            store
                .try_insert(listing("C", "3 rue C").with_website("https://c.example"), "Lille")
                .unwrap();
            store.keys()
        };

        let stats = Arc::new(RunStats::new());
        let reloaded = RecordStore::open(&path, &sentinels(), stats.clone()).unwrap();
        assert_eq!(reloaded.keys(), expected);
        assert_eq!(stats.snapshot().total_records, 3);
        assert_eq!(stats.snapshot().new_records, 0);
        assert_eq!(
            reloaded.try_insert(listing("A", "1 rue A"), "Lyon").unwrap(),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn torn_trailing_row_is_discarded_and_log_stays_appendable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        {
            let store = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
            store.try_insert(listing("A", "1 rue A"), "Lyon").unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"B,04 00,\"2 rue").unwrap();
        drop(file);

        let store = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
        assert_eq!(store.len(), 1);
        store.try_insert(listing("B", "2 rue B"), "Lyon").unwrap();
        drop(store);

        let names: Vec<String> = read_records(&path).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn empty_file_gets_a_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        File::create(&path).unwrap();

        let store = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
        assert!(store.is_empty());
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("name,phone,address,city,website,scraped_at"));
    }

    #[test]
    fn log_without_website_column_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "name,phone,address,city,scraped_at\nA,01,1 rue A,Paris,2024-05-01T10:00:00Z\n",
        )
        .unwrap();

        let store = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
        assert!(store.contains("A", "1 rue A"));
        store
            .try_insert(listing("B", "2 rue B").with_website("https://b.example"), "Paris")
            .unwrap();
        drop(store);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].website, None);
    }

    #[test]
    fn failed_append_leaves_no_bytes_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let stats = Arc::new(RunStats::new());
        let store = RecordStore::open(&path, &sentinels(), stats.clone()).unwrap();

        // A read-only handle makes every write fail.
        store.inner.lock().unwrap().file = File::open(&path).unwrap();
        let failed = store.try_insert(listing("Bowling X", "1 rue A"), "Lyon");
        assert!(matches!(failed, Err(HarvestError::StorageWrite { .. })));
        assert!(!store.contains("Bowling X", "1 rue A"));
        assert_eq!(stats.snapshot().errors, 1);

        store.inner.lock().unwrap().file = OpenOptions::new().append(true).open(&path).unwrap();
        store.try_insert(listing("Arcade Y", "2 rue B"), "Lyon").unwrap();
        let names: Vec<String> = read_records(&path).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Arcade Y".to_string()]);

        // Seen again later, the listing is stored exactly once.
        let retried = store.try_insert(listing("Bowling X", "1 rue A"), "Lyon").unwrap();
        assert!(matches!(retried, InsertOutcome::Accepted(_)));
        drop(store);
        let reloaded = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new())).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_inserts_of_one_key_store_it_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let stats = Arc::new(RunStats::new());
        let store = RecordStore::open(&path, &sentinels(), stats.clone()).unwrap();
        let barrier = std::sync::Barrier::new(8);

        let outcomes: Vec<InsertOutcome> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        store.try_insert(listing("Bowling X", "1 rue A"), "Lyon").unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let accepted = outcomes.iter().filter(|o| matches!(o, InsertOutcome::Accepted(_))).count();
        assert_eq!(accepted, 1);
        assert_eq!(stats.snapshot().duplicates, 7);
        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn foreign_csv_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "company,country\nAcme,FR\n").unwrap();

        let result = RecordStore::open(&path, &sentinels(), Arc::new(RunStats::new()));
        assert!(matches!(result, Err(HarvestError::Config(_))));
    }
}
