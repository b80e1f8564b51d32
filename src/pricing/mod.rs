//! Pricing decisions.
//!
//! Pure logic: given a listing's configuration and the competitor offers
//! crawled for it, decide the price to publish. Randomness is injected so
//! callers (and tests) control the generator.
//!
//! - `offers`: filtering and selection over crawled offers
//! - `price`: the randomized undercut calculation

pub mod offers;
pub mod price;

use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

pub use offers::{filter_valid_offers, find_lower_price_offers, find_offer_min_price};
pub use price::calculate_price_change;

use crate::types::{CompareMode, DecisionReason, ListingConfig, Offer, PricingDecision};

/// Price used when no competitor survives filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPrice {
    /// The listing's max price when set, else its min price.
    #[default]
    MaxOrMin,
    /// Always the min price.
    Min,
}

impl FallbackPrice {
    pub fn price_for(&self, config: &ListingConfig) -> Decimal {
        match self {
            Self::MaxOrMin => config.max_price.unwrap_or(config.min_price),
            Self::Min => config.min_price,
        }
    }
}

pub struct PricingEngine {
    /// Marketplace seller name of the operator. Used to find our own
    /// crawled price and to keep ourselves out of the cheaper-sellers list.
    own_seller: Option<String>,
    fallback: FallbackPrice,
}

impl PricingEngine {
    pub fn new(own_seller: Option<String>, fallback: FallbackPrice) -> Self {
        Self {
            own_seller: own_seller.filter(|s| !s.trim().is_empty()),
            fallback,
        }
    }

    pub fn fallback(&self) -> FallbackPrice {
        self.fallback
    }

    fn is_own(&self, offer: &Offer) -> bool {
        self.own_seller.as_deref() == Some(offer.seller.as_str())
    }

    /// Crawled competitors (any, filtered or not) cheaper than `threshold`.
    fn cheaper_competitors(&self, offers: &[Offer], threshold: Decimal) -> Vec<Offer> {
        find_lower_price_offers(offers, threshold)
            .into_iter()
            .filter(|o| !self.is_own(o))
            .collect()
    }

    /// Our current price as crawled: the first offer sold by us.
    pub fn own_price(&self, offers: &[Offer]) -> Option<Decimal> {
        offers.iter().find(|o| self.is_own(o)).map(|o| o.price)
    }

    /// Decide the price for one listing.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        config: &ListingConfig,
        offers: &[Offer],
        rng: &mut R,
    ) -> PricingDecision {
        let own_price = self.own_price(offers);

        if config.compare_mode == CompareMode::Disabled {
            return PricingDecision {
                target_price: config.min_price,
                compare_offer: None,
                skipped: false,
                reason: DecisionReason::NoCompare,
                own_price,
                lower_offers: Vec::new(),
            };
        }

        // our own offer is never a competitor
        let valid: Vec<Offer> = filter_valid_offers(
            offers,
            config.min_price,
            config.max_price,
            &config.blacklist,
            config.include_keywords.as_deref(),
            config.exclude_keywords.as_deref(),
        )
        .into_iter()
        .filter(|o| !self.is_own(o))
        .collect();
        debug!(
            index = config.index,
            crawled = offers.len(),
            valid = valid.len(),
            "Offers filtered"
        );

        let Some(best) = find_offer_min_price(&valid).cloned() else {
            return PricingDecision {
                target_price: self.fallback.price_for(config),
                compare_offer: None,
                skipped: false,
                reason: DecisionReason::NoValidCompetitor,
                own_price,
                lower_offers: self.cheaper_competitors(offers, config.min_price),
            };
        };

        if config.compare_mode == CompareMode::CompareIfWorse {
            if let Some(own) = own_price {
                if own < best.price && own >= best.price - config.discount_max {
                    return PricingDecision {
                        target_price: own,
                        compare_offer: Some(best),
                        skipped: true,
                        reason: DecisionReason::AlreadyLowest,
                        own_price,
                        lower_offers: self.cheaper_competitors(offers, own),
                    };
                }
            }
        }

        let target_price = calculate_price_change(
            best.price,
            config.min_price,
            config.discount_min,
            config.discount_max,
            config.rounding_digits,
            rng,
        );
        let lower_offers = self.cheaper_competitors(offers, target_price);

        PricingDecision {
            target_price,
            compare_offer: Some(best),
            skipped: false,
            reason: DecisionReason::Undercut,
            own_price,
            lower_offers,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
