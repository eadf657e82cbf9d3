use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use ::scraper::{Html, Selector};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::{HarvestError, Result};
use crate::extractor::Extractor;
use crate::fetcher::{CardRef, PageFetcher};
use crate::record::ExtractedListing;

/// `PageFetcher` for result feeds served as plain HTML: cards are links to
/// detail pages and "loading more" follows the feed's next-page link.
pub struct HttpFetcher {
    client: Client,
    selectors: FeedSelectors,
    extractor: Extractor,
}

struct FeedSelectors {
    card: Selector,
    title: Selector,
    info: Selector,
    website: Selector,
    next_page: Selector,
    consent: Selector,
}

pub struct HttpSession {
    url: Url,
    cards: Vec<CardRef>,
    next_page: Option<Url>,
    consent_action: Option<Url>,
}

/// What one feed page yields.
struct FeedPage {
    card_links: Vec<String>,
    next_page: Option<Url>,
    consent_action: Option<Url>,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| HarvestError::Config(format!("invalid user agent: {}", e)))?;
        let language = HeaderValue::from_str(&config.accept_language)
            .map_err(|e| HarvestError::Config(format!("invalid accept language: {}", e)))?;
        headers.insert(USER_AGENT, user_agent);
        headers.insert(ACCEPT_LANGUAGE, language);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.navigation_timeout_secs))
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpFetcher {
            client,
            selectors: FeedSelectors {
                card: parse_selector(&config.card_selector)?,
                title: parse_selector(&config.title_selector)?,
                info: parse_selector(&config.info_selector)?,
                website: parse_selector(&config.website_selector)?,
                next_page: parse_selector(&config.next_page_selector)?,
                consent: parse_selector(&config.consent_selector)?,
            },
            extractor: Extractor::new(config.country_hint.clone()),
        })
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HarvestError::navigation(url.as_str(), e))?;

        let status = resp.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            warn!("Blocked at {}: {}", url, status);
        }
        if !status.is_success() {
            return Err(HarvestError::navigation(url.as_str(), format!("HTTP {}", status)));
        }
        resp.text().await.map_err(|e| HarvestError::navigation(url.as_str(), e))
    }

    fn parse_feed(&self, html: &str, base: &Url) -> FeedPage {
        let document = Html::parse_document(html);
        let card_links = document
            .select(&self.selectors.card)
            .filter_map(|el| el.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(|u| u.to_string())
            .collect();
        let next_page = document
            .select(&self.selectors.next_page)
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| base.join(href).ok());
        let consent_action = document
            .select(&self.selectors.consent)
            .next()
            .map(|form| form.value().attr("action").unwrap_or(""))
            .and_then(|action| base.join(action).ok());
        FeedPage {
            card_links,
            next_page,
            consent_action,
        }
    }

    fn parse_detail(&self, html: &str, base: &Url) -> Option<ExtractedListing> {
        let document = Html::parse_document(html);
        let name = document
            .select(&self.selectors.title)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())?;

        let lines: Vec<String> = document
            .select(&self.selectors.info)
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .collect();
        let fields = self.extractor.classify(lines.iter().map(String::as_str));

        let website = document
            .select(&self.selectors.website)
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| base.join(href).ok())
            .map(|u| u.to_string());

        Some(ExtractedListing {
            name,
            phone: fields.phone,
            address: fields.address,
            website,
        })
    }

    async fn fetch_detail(&self, card: &CardRef) -> Result<ExtractedListing> {
        let extraction = |reason: String| HarvestError::Extraction {
            card: card.id.clone(),
            reason,
        };
        let url = Url::parse(&card.id).map_err(|e| extraction(e.to_string()))?;
        let html = self.get_text(&url).await.map_err(|e| extraction(e.to_string()))?;
        self.parse_detail(&html, &url)
            .ok_or_else(|| extraction("no title on detail page".to_string()))
    }
}

impl HttpSession {
    fn absorb(&mut self, page: FeedPage) -> usize {
        let before = self.cards.len();
        for link in page.card_links {
            if !self.cards.iter().any(|c| c.id == link) {
                let index = self.cards.len();
                self.cards.push(CardRef::new(link, index));
            }
        }
        self.next_page = page.next_page;
        self.cards.len() - before
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    type Session = HttpSession;

    async fn open(&self, url: &str) -> Result<HttpSession> {
        let url = Url::parse(url).map_err(|e| HarvestError::navigation(url, e))?;
        let html = self.get_text(&url).await?;
        let page = self.parse_feed(&html, &url);
        let mut session = HttpSession {
            url,
            cards: Vec::new(),
            next_page: None,
            consent_action: page.consent_action.clone(),
        };
        let found = session.absorb(page);
        info!("Loading results... {} cards on first page of {}", found, session.url);
        Ok(session)
    }

    async fn dismiss_consent(&self, session: &mut HttpSession) {
        let Some(action) = session.consent_action.take() else {
            debug!("No consent form or already accepted.");
            return;
        };
        if let Err(e) = self.get_text(&action).await {
            debug!("Consent form could not be submitted: {}", e);
            return;
        }
        // The feed behind the interstitial is only served once consent is stored.
        match self.get_text(&session.url).await {
            Ok(html) => {
                let page = self.parse_feed(&html, &session.url);
                session.absorb(page);
            }
            Err(e) => debug!("Reload after consent failed: {}", e),
        }
    }

    async fn list_cards(&self, session: &mut HttpSession) -> Result<Vec<CardRef>> {
        Ok(session.cards.clone())
    }

    async fn extract(&self, session: &mut HttpSession, card: &CardRef) -> Option<ExtractedListing> {
        match self.fetch_detail(card).await {
            Ok(listing) => Some(listing),
            Err(e) => {
                debug!("{} (feed {})", e, session.url);
                None
            }
        }
    }

    async fn scroll_more(&self, session: &mut HttpSession) -> Result<()> {
        let Some(next) = session.next_page.clone() else {
            debug!("No further page for {}", session.url);
            return Ok(());
        };
        let html = self.get_text(&next).await?;
        let page = self.parse_feed(&html, &next);
        let added = session.absorb(page);
        debug!("Next page {} added {} cards", next, added);
        Ok(())
    }

    async fn close(&self, session: HttpSession) {
        debug!("Closed feed {} ({} cards seen)", session.url, session.cards.len());
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| HarvestError::Config(format!("invalid selector '{}': {:?}", selector, e)))
}
