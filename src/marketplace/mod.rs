//! Marketplace listing updates.
//!
//! Defines the `MarketplaceClient` trait and provides:
//! - `GameboostClient`: REST client for the live marketplace
//! - `DryRunMarketplace`: logs the update and acknowledges it

pub mod gameboost;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::types::{ListingCategory, RepricerError};

/// Confirmation of an accepted update.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferAck {
    pub listing_id: String,
    pub price: Decimal,
    pub stock: Option<u32>,
    /// Request id sent with the update, or a `dry-run-` id.
    pub reference: String,
    pub dry_run: bool,
}

/// Mutates one of the operator's listings on the marketplace.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Set the price (and, where the category tracks it, the stock) of a
    /// listing. Non-2xx responses surface as retryable network errors.
    async fn update_offer(
        &self,
        category: ListingCategory,
        listing_id: &str,
        price: Decimal,
        stock: Option<u32>,
    ) -> Result<OfferAck, RepricerError>;
}

/// Acknowledges every update without calling out.
#[derive(Debug, Default)]
pub struct DryRunMarketplace;

#[async_trait]
impl MarketplaceClient for DryRunMarketplace {
    async fn update_offer(
        &self,
        category: ListingCategory,
        listing_id: &str,
        price: Decimal,
        stock: Option<u32>,
    ) -> Result<OfferAck, RepricerError> {
        info!(
            %category,
            listing_id,
            price = %price,
            stock = ?stock,
            "[DRY RUN] Would update offer"
        );
        Ok(OfferAck {
            listing_id: listing_id.to_string(),
            price,
            stock,
            reference: format!("dry-run-{}", uuid::Uuid::new_v4()),
            dry_run: true,
        })
    }
}
