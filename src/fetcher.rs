use async_trait::async_trait;

use crate::error::Result;
use crate::record::ExtractedListing;

/// A visible result entry, identified by something stable across scrolls
/// (its detail link, typically).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardRef {
    pub id: String,
    /// Position in the feed when it was listed.
    pub index: usize,
}

impl CardRef {
    pub fn new(id: impl Into<String>, index: usize) -> Self {
        CardRef { id: id.into(), index }
    }
}

/// Access to a paginated result feed.
///
/// A session owns the on-screen state of one feed; extraction opens and
/// closes a card's detail view, so calls on one session are strictly
/// sequential.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Session: Send;

    /// Load the feed for a search URL.
    async fn open(&self, url: &str) -> Result<Self::Session>;

    /// Decline a one-time consent interstitial if one is shown. Never fails.
    async fn dismiss_consent(&self, session: &mut Self::Session);

    /// Cards currently visible, in feed order.
    async fn list_cards(&self, session: &mut Self::Session) -> Result<Vec<CardRef>>;

    /// Read one card's fields. `None` when this card could not be read.
    async fn extract(&self, session: &mut Self::Session, card: &CardRef) -> Option<ExtractedListing>;

    /// Ask the feed for more cards.
    async fn scroll_more(&self, session: &mut Self::Session) -> Result<()>;

    async fn close(&self, session: Self::Session);
}
