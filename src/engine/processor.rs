//! Per-listing processing.
//!
//! Drives one listing through `NeedsCrawl → Crawled → Filtered → Decided →
//! Updated` for one cycle. Any error moves it to `Failed`, which records
//! an error note and ends the listing's cycle. A crawl failure is not an
//! error: the listing is priced as if no competitor were found.

use chrono::Local;
use rand::rngs::SmallRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::notes;
use crate::crawler::CrawlSession;
use crate::marketplace::MarketplaceClient;
use crate::pricing::PricingEngine;
use crate::retry::RetryPolicy;
use crate::sheets::rows::RowStore;
use crate::types::{
    CompareMode, ListingConfig, ListingOutcome, ListingState, Offer, PricingDecision,
    RepricerError,
};

/// Result of processing one index.
#[derive(Debug, Clone)]
pub struct Processed {
    pub outcome: ListingOutcome,
    /// Pause the worker should take before its next listing.
    pub relax: Option<Duration>,
}

pub struct ListingProcessor {
    rows: RowStore,
    pricing: PricingEngine,
    marketplace: Arc<dyn MarketplaceClient>,
    retry: RetryPolicy,
}

impl ListingProcessor {
    pub fn new(
        rows: RowStore,
        pricing: PricingEngine,
        marketplace: Arc<dyn MarketplaceClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rows,
            pricing,
            marketplace,
            retry,
        }
    }

    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    /// Process one listing. Never fails: errors become a `Failed` outcome
    /// with an error note.
    pub async fn process(
        &self,
        index: u32,
        session: &mut dyn CrawlSession,
        rng: &mut SmallRng,
    ) -> Processed {
        let mut state = ListingState::NeedsCrawl;
        self.process_tracked(index, session, rng, &mut state).await
    }

    /// Like [`process`](Self::process), exposing the current state through
    /// `state` so a caller that loses the future (panic, abort) still
    /// knows how far the listing got.
    pub async fn process_tracked(
        &self,
        index: u32,
        session: &mut dyn CrawlSession,
        rng: &mut SmallRng,
        state: &mut ListingState,
    ) -> Processed {
        match self.run(index, session, rng, state).await {
            Ok(processed) => processed,
            Err(e) => {
                let failed_at = *state;
                *state = ListingState::Failed;
                Processed {
                    outcome: self.record_failure(index, failed_at, &e.to_string()).await,
                    relax: None,
                }
            }
        }
    }

    /// Log a failure, stage its error note and build the outcome.
    pub async fn record_failure(
        &self,
        index: u32,
        state: ListingState,
        error: &str,
    ) -> ListingOutcome {
        warn!(index, %state, error, "Listing failed");
        let ts = notes::timestamp(Local::now());
        let note = notes::failed(&ts, state, error);
        if let Err(e) = self.rows.record_note(index, &note, &ts).await {
            warn!(index, error = %e, "Failed to stage error note");
        }
        ListingOutcome::Failed {
            index,
            state,
            error: error.to_string(),
        }
    }

    async fn run(
        &self,
        index: u32,
        session: &mut dyn CrawlSession,
        rng: &mut SmallRng,
        state: &mut ListingState,
    ) -> Result<Processed, RepricerError> {
        let config = self.rows.load(index).await?;
        debug!(index, name = %config.name, category = %config.category, "Listing loaded");

        let (offers, crawl_error) = self.crawl(&config, session).await;
        *state = ListingState::Crawled;

        *state = ListingState::Filtered;
        let decision = self.pricing.decide(&config, &offers, rng);
        *state = ListingState::Decided;
        info!(
            index,
            reason = %decision.reason,
            target = %decision.target_price,
            compare = ?decision.compare_offer.as_ref().map(|o| o.to_string()),
            "Price decided"
        );

        let ts = notes::timestamp(Local::now());
        if decision.skipped {
            self.rows
                .record_note(index, &notes::skipped(&ts, &config, &decision), &ts)
                .await?;
            return Ok(Processed {
                outcome: ListingOutcome::Skipped { index, decision },
                relax: None,
            });
        }

        self.push_price(&config, &decision).await?;
        *state = ListingState::Updated;

        let note = notes::updated(&ts, &config, &decision, crawl_error.as_deref());
        self.rows.record_note(index, &note, &ts).await?;

        Ok(Processed {
            outcome: ListingOutcome::Updated { index, decision },
            relax: Duration::try_from_secs_f64(config.relax_time_secs).ok(),
        })
    }

    /// Crawl competitor offers. Disabled listings skip the crawl; a failed
    /// crawl yields no offers plus the error text for the note.
    async fn crawl(
        &self,
        config: &ListingConfig,
        session: &mut dyn CrawlSession,
    ) -> (Vec<Offer>, Option<String>) {
        if config.compare_mode == CompareMode::Disabled {
            return (Vec::new(), None);
        }
        match session.extract(config.category, &config.compare_url).await {
            Ok(offers) => (offers, None),
            Err(e) => {
                warn!(index = config.index, url = %config.compare_url, error = %e, "Crawl failed, using fallback price");
                (Vec::new(), Some(e.to_string()))
            }
        }
    }

    /// Send the decided price to every marketplace listing of the row.
    async fn push_price(
        &self,
        config: &ListingConfig,
        decision: &PricingDecision,
    ) -> Result<(), RepricerError> {
        let stock = config.stock.filter(|_| config.category.tracks_stock());
        for listing_id in &config.listing_ids {
            let ack = self
                .retry
                .run("marketplace.update", || {
                    self.marketplace.update_offer(
                        config.category,
                        listing_id,
                        decision.target_price,
                        stock,
                    )
                })
                .await?;
            debug!(
                index = config.index,
                listing_id = %ack.listing_id,
                price = %ack.price,
                reference = %ack.reference,
                dry_run = ack.dry_run,
                "Marketplace acknowledged"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
