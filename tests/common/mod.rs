#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use listing_harvester_lib::config::{DelayConfig, HarvestConfig};
use listing_harvester_lib::{CardRef, ExtractedListing, HarvestError, PageFetcher, Result};

pub const URL_TEMPLATE: &str = "https://maps.test/search?q={query}";

/// One result card: a stable id and what extraction yields for it.
#[derive(Debug, Clone)]
pub struct ScriptCard {
    pub id: String,
    pub listing: Option<ExtractedListing>,
}

impl ScriptCard {
    pub fn listing(id: &str, name: &str, address: &str) -> Self {
        ScriptCard {
            id: id.to_string(),
            listing: Some(ExtractedListing::new(name, "04 78 00 00 00", address)),
        }
    }

    pub fn unreadable(id: &str) -> Self {
        ScriptCard {
            id: id.to_string(),
            listing: None,
        }
    }
}

/// `count` distinct, valid cards for `region`.
pub fn cards(region: &str, count: usize) -> Vec<ScriptCard> {
    (0..count)
        .map(|i| {
            ScriptCard::listing(
                &format!("{}-{}", region, i),
                &format!("Venue {} {}", region, i),
                &format!("{} rue du Jeu, {}", i + 1, region),
            )
        })
        .collect()
}

/// What the feed for one region does. `rounds[n]` is the full visible list
/// after `n` scrolls; the last entry repeats once scrolling runs out.
#[derive(Debug, Clone, Default)]
pub struct RegionScript {
    pub fail_opens: u32,
    pub rounds: Vec<Vec<ScriptCard>>,
    /// Extraction never returns for this region.
    pub hang_on_extract: bool,
    pub extract_delay: Option<Duration>,
    /// The n-th `list_cards` call for this region (counting across sessions) fails.
    pub fail_list_on: Option<usize>,
    pub fail_scroll_on: Option<usize>,
}

impl RegionScript {
    pub fn new() -> Self {
        RegionScript::default()
    }

    pub fn round(mut self, cards: Vec<ScriptCard>) -> Self {
        self.rounds.push(cards);
        self
    }

    pub fn fail_opens(mut self, count: u32) -> Self {
        self.fail_opens = count;
        self
    }

    pub fn fail_list_on(mut self, call: usize) -> Self {
        self.fail_list_on = Some(call);
        self
    }

    pub fn fail_scroll_on(mut self, call: usize) -> Self {
        self.fail_scroll_on = Some(call);
        self
    }

    pub fn hang_on_extract(mut self) -> Self {
        self.hang_on_extract = true;
        self
    }

    pub fn extract_delay(mut self, delay: Duration) -> Self {
        self.extract_delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub opens: usize,
    pub closes: usize,
    pub lists: usize,
    pub scrolls: usize,
    pub extracts: usize,
}

type ExtractHook = Box<dyn Fn(&str, usize) + Send + Sync>;

struct Inner {
    scripts: HashMap<String, RegionScript>,
    calls: Mutex<HashMap<String, Calls>>,
    live_sessions: AtomicUsize,
    max_live_sessions: AtomicUsize,
    on_extract: Mutex<Option<ExtractHook>>,
}

/// In-memory `PageFetcher` that plays back per-region scripts and counts
/// every call it receives.
#[derive(Clone)]
pub struct ScriptedFetcher {
    inner: Arc<Inner>,
}

pub struct ScriptedSession {
    region: String,
    scrolls: usize,
}

impl ScriptedFetcher {
    pub fn new<I>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, RegionScript)>,
    {
        ScriptedFetcher {
            inner: Arc::new(Inner {
                scripts: scripts.into_iter().map(|(r, s)| (r.to_string(), s)).collect(),
                calls: Mutex::new(HashMap::new()),
                live_sessions: AtomicUsize::new(0),
                max_live_sessions: AtomicUsize::new(0),
                on_extract: Mutex::new(None),
            }),
        }
    }

    /// Runs `hook(region, n)` after the n-th extraction in a region returns.
    pub fn on_extract<H>(&self, hook: H)
    where
        H: Fn(&str, usize) + Send + Sync + 'static,
    {
        *self.inner.on_extract.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self, region: &str) -> Calls {
        self.inner.calls.lock().unwrap().get(region).copied().unwrap_or_default()
    }

    pub fn live_sessions(&self) -> usize {
        self.inner.live_sessions.load(Ordering::SeqCst)
    }

    pub fn max_live_sessions(&self) -> usize {
        self.inner.max_live_sessions.load(Ordering::SeqCst)
    }

    fn bump(&self, region: &str, field: impl FnOnce(&mut Calls) -> &mut usize) -> usize {
        let mut calls = self.inner.calls.lock().unwrap();
        let counter = field(calls.entry(region.to_string()).or_default());
        *counter += 1;
        *counter
    }

    fn script(&self, region: &str) -> &RegionScript {
        self.inner
            .scripts
            .get(region)
            .unwrap_or_else(|| panic!("no script for region {}", region))
    }

    fn visible(&self, session: &ScriptedSession) -> &[ScriptCard] {
        let rounds = &self.script(&session.region).rounds;
        if rounds.is_empty() {
            return &[];
        }
        &rounds[session.scrolls.min(rounds.len() - 1)]
    }
}

fn region_of(url: &str) -> String {
    let query = url.rsplit("q=").next().unwrap_or_default();
    urlencoding::decode(query).unwrap().into_owned()
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    type Session = ScriptedSession;

    async fn open(&self, url: &str) -> Result<ScriptedSession> {
        let region = region_of(url);
        let attempt = self.bump(&region, |c| &mut c.opens);
        if attempt as u32 <= self.script(&region).fail_opens {
            return Err(HarvestError::navigation(url, "scripted failure"));
        }
        let live = self.inner.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_live_sessions.fetch_max(live, Ordering::SeqCst);
        Ok(ScriptedSession { region, scrolls: 0 })
    }

    async fn dismiss_consent(&self, _session: &mut ScriptedSession) {}

    async fn list_cards(&self, session: &mut ScriptedSession) -> Result<Vec<CardRef>> {
        let call = self.bump(&session.region, |c| &mut c.lists);
        if self.script(&session.region).fail_list_on == Some(call) {
            return Err(HarvestError::navigation(&session.region, "scripted listing failure"));
        }
        Ok(self
            .visible(session)
            .iter()
            .enumerate()
            .map(|(i, card)| CardRef::new(card.id.clone(), i))
            .collect())
    }

    async fn extract(&self, session: &mut ScriptedSession, card: &CardRef) -> Option<ExtractedListing> {
        let script = self.script(&session.region);
        if script.hang_on_extract {
            self.bump(&session.region, |c| &mut c.extracts);
            std::future::pending::<()>().await;
        }
        if let Some(delay) = script.extract_delay {
            tokio::time::sleep(delay).await;
        }
        let listing = self
            .visible(session)
            .iter()
            .find(|c| c.id == card.id)
            .and_then(|c| c.listing.clone());
        let n = self.bump(&session.region, |c| &mut c.extracts);
        if let Some(hook) = self.inner.on_extract.lock().unwrap().as_ref() {
            hook(&session.region, n);
        }
        listing
    }

    async fn scroll_more(&self, session: &mut ScriptedSession) -> Result<()> {
        let call = self.bump(&session.region, |c| &mut c.scrolls);
        if self.script(&session.region).fail_scroll_on == Some(call) {
            return Err(HarvestError::navigation(&session.region, "scripted scroll failure"));
        }
        session.scrolls += 1;
        Ok(())
    }

    async fn close(&self, session: ScriptedSession) {
        self.bump(&session.region, |c| &mut c.closes);
        self.inner.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A config with no delays that writes into `dir`.
pub fn test_config(dir: &Path, regions: &[&str]) -> HarvestConfig {
    let mut config = HarvestConfig {
        output_path: dir.join("establishments.csv"),
        progress_path: Some(dir.join("progress.json")),
        url_template: URL_TEMPLATE.to_string(),
        regions: regions.iter().map(|r| r.to_string()).collect(),
        concurrency: 1,
        delays: DelayConfig::immediate(),
        ..HarvestConfig::default()
    };
    config.limits.max_scroll_rounds = None;
    config
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
