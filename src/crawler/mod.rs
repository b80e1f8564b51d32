//! Competitor page crawling.
//!
//! Defines the `Crawler` / `CrawlSession` traits and the HTTP
//! implementation. A session is owned by exactly one worker for the
//! worker's whole lifetime and is never shared.

pub mod http;
pub mod page;

use async_trait::async_trait;

use crate::types::{ListingCategory, Offer, RepricerError};

/// One stateful browsing session (cookies, connection pool).
#[async_trait]
pub trait CrawlSession: Send {
    /// Fetch `url` and parse the competitor offers listed on it.
    async fn extract(
        &mut self,
        category: ListingCategory,
        url: &str,
    ) -> Result<Vec<Offer>, RepricerError>;

    /// Release the session. Further calls to `extract` fail.
    async fn close(&mut self);
}

/// Factory for crawl sessions.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, RepricerError>;
}
