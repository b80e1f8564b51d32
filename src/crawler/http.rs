//! Plain-HTTP crawler.
//!
//! Each session is its own reqwest client with a private cookie jar, so
//! workers never share cookies or connections. After every page load the
//! session sleeps a short random interval to keep the request rate
//! irregular.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::page::parse_offers;
use super::{CrawlSession, Crawler};
use crate::config::CrawlerConfig;
use crate::types::{ListingCategory, Offer, RepricerError};

pub struct HttpCrawler {
    config: CrawlerConfig,
    next_session: AtomicU64,
}

impl HttpCrawler {
    pub fn new(config: CrawlerConfig) -> Self {
        Self {
            config,
            next_session: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, RepricerError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(self.config.user_agent.clone())
            .build()
            .map_err(|e| RepricerError::Crawl(format!("failed to build crawl client: {e}")))?;

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        info!(session = id, "Crawl session opened");
        Ok(Box::new(HttpSession {
            id,
            http: Some(http),
            jitter_ms: (self.config.jitter_min_ms, self.config.jitter_max_ms),
        }))
    }
}

struct HttpSession {
    id: u64,
    /// `None` once closed.
    http: Option<Client>,
    jitter_ms: (u64, u64),
}

impl HttpSession {
    fn jitter(&self) -> Duration {
        let (lo, hi) = self.jitter_ms;
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    async fn fetch(&self, url: &str) -> Result<String, RepricerError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| RepricerError::Crawl("session closed".into()))?;

        let resp = http
            .get(url)
            .send()
            .await
            .map_err(|e| RepricerError::Crawl(format!("GET {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(RepricerError::Crawl(format!("GET {url}: HTTP {}", resp.status())));
        }
        resp.text()
            .await
            .map_err(|e| RepricerError::Crawl(format!("GET {url}: {e}")))
    }
}

#[async_trait]
impl CrawlSession for HttpSession {
    async fn extract(
        &mut self,
        category: ListingCategory,
        url: &str,
    ) -> Result<Vec<Offer>, RepricerError> {
        let body = self.fetch(url).await;

        let pause = self.jitter();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let offers = parse_offers(&body?, category)?;
        debug!(session = self.id, url, %category, offers = offers.len(), "Page crawled");
        Ok(offers)
    }

    async fn close(&mut self) {
        if self.http.take().is_some() {
            info!(session = self.id, "Crawl session closed");
        }
    }
}
