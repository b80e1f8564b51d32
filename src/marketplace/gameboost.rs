//! Gameboost marketplace REST client.
//!
//! API docs: https://docs.gameboost.com
//! Base URL: https://api.gameboost.com/v2
//! Auth: `Authorization: Bearer {key}`
//!
//! Offers are updated with `PATCH /{kind}-offers/{id}`. Prices are sent as
//! plain decimal strings so no float rounding happens on the way out.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{MarketplaceClient, OfferAck};
use crate::types::{ListingCategory, RepricerError};

pub const DEFAULT_BASE_URL: &str = "https://api.gameboost.com/v2";
const SERVICE: &str = "gameboost";

#[derive(Debug, Serialize)]
struct UpdateOfferRequest {
    price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stock: Option<u32>,
}

impl UpdateOfferRequest {
    fn new(category: ListingCategory, price: Decimal, stock: Option<u32>) -> Self {
        Self {
            price: price.to_string(),
            stock: stock.filter(|_| category.tracks_stock()),
        }
    }
}

pub struct GameboostClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl GameboostClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, RepricerError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("repricer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepricerError::Config(format!("failed to build marketplace client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn offer_url(&self, category: ListingCategory, listing_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            category.offers_path(),
            urlencoding::encode(listing_id)
        )
    }
}

#[async_trait]
impl MarketplaceClient for GameboostClient {
    async fn update_offer(
        &self,
        category: ListingCategory,
        listing_id: &str,
        price: Decimal,
        stock: Option<u32>,
    ) -> Result<OfferAck, RepricerError> {
        let url = self.offer_url(category, listing_id);
        let body = UpdateOfferRequest::new(category, price, stock);
        let reference = uuid::Uuid::new_v4().to_string();
        debug!(url = %url, price = %body.price, stock = ?body.stock, reference = %reference, "Updating offer");

        let resp = self
            .http
            .patch(&url)
            .bearer_auth(self.api_key.expose_secret())
            .header("X-Request-Id", &reference)
            .json(&body)
            .send()
            .await
            .map_err(|e| RepricerError::network(SERVICE, format!("PATCH {url}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RepricerError::network(
                SERVICE,
                format!("PATCH {url} returned {status}: {text}"),
            ));
        }

        info!(%category, listing_id, price = %price, "Offer updated");
        Ok(OfferAck {
            listing_id: listing_id.to_string(),
            price,
            stock: body.stock,
            reference,
            dry_run: false,
        })
    }
}
