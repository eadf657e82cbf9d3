use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column order of the durable record log.
pub const LOG_COLUMNS: [&str; 6] = ["name", "phone", "address", "city", "website", "scraped_at"];

/// Fields read from one result card's detail view, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedListing {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub website: Option<String>,
}

impl ExtractedListing {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, address: impl Into<String>) -> Self {
        ExtractedListing {
            name: name.into(),
            phone: phone.into(),
            address: address.into(),
            website: None,
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }
}

/// A persisted listing. One row of the record log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub website: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl Record {
    /// Stamps an extracted listing with its region and the capture time.
    pub fn capture(listing: ExtractedListing, city: &str) -> Self {
        Record {
            name: listing.name,
            phone: listing.phone,
            address: listing.address,
            city: city.to_string(),
            website: listing.website.filter(|w| !w.trim().is_empty()),
            scraped_at: Utc::now(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.name, &self.address)
    }
}

/// Identity of a listing: exact, case-sensitive (name, address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub name: String,
    pub address: String,
}

impl RecordKey {
    pub fn new(name: &str, address: &str) -> Self {
        RecordKey {
            name: name.to_string(),
            address: address.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyName,
    EmptyAddress,
    /// The name is a results-summary pseudo-card, not a listing.
    Placeholder,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::EmptyName => "empty name",
            RejectReason::EmptyAddress => "empty address",
            RejectReason::Placeholder => "placeholder name",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Accepted(Record),
    Duplicate,
    Rejected(RejectReason),
}
