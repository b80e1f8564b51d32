//! Offer extraction from a marketplace listing page.
//!
//! The page is a server-rendered single-page app: everything we need sits
//! as JSON in the `data-page` attribute of the `#app` element, under
//! `props.model`. Each category keeps its offers in a different list and
//! prices them under a different key.

use rust_decimal::prelude::*;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::types::{ListingCategory, Offer, RepricerError};

fn crawl_err(msg: impl Into<String>) -> RepricerError {
    RepricerError::Crawl(msg.into())
}

/// Pull the `props.model` object out of the page.
fn page_model(html: &str) -> Result<Value, RepricerError> {
    let doc = Html::parse_document(html);
    let selector =
        Selector::parse("#app").map_err(|e| crawl_err(format!("bad selector: {e}")))?;
    let app = doc
        .select(&selector)
        .next()
        .ok_or_else(|| crawl_err("#app element not found"))?;
    let data = app
        .value()
        .attr("data-page")
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| crawl_err("data-page attribute missing"))?;

    let mut page: Value = serde_json::from_str(data)
        .map_err(|e| crawl_err(format!("data-page is not JSON: {e}")))?;
    let model = page
        .get_mut("props")
        .ok_or_else(|| crawl_err("props missing"))?
        .get_mut("model")
        .map(Value::take)
        .filter(|m| !m.is_null())
        .ok_or_else(|| crawl_err("props.model missing"))?;
    Ok(model)
}

/// Prices arrive as JSON numbers or numeric strings.
fn decimal_of(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}

fn offer_from(raw: &Value, price_key: &str) -> Result<Offer, RepricerError> {
    let seller = raw
        .pointer("/seller/username")
        .and_then(Value::as_str)
        .ok_or_else(|| crawl_err("offer without seller.username"))?;
    let price = raw
        .get("price")
        .and_then(|p| p.get(price_key))
        .and_then(decimal_of)
        .ok_or_else(|| crawl_err(format!("offer without numeric price.{price_key}")))?;
    let title = raw.get("title").and_then(Value::as_str).unwrap_or_default();
    let id = raw.get("id").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Ok(Offer {
        seller: seller.to_string(),
        price,
        title: title.to_string(),
        id,
    })
}

fn data_list<'a>(model: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    model
        .get(key)
        .and_then(|l| l.get("data"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Parse every competitor offer on the page, in page order.
pub fn parse_offers(html: &str, category: ListingCategory) -> Result<Vec<Offer>, RepricerError> {
    let model = page_model(html)?;

    match category {
        ListingCategory::Currency => {
            // the featured offer sits outside the paged list
            model
                .get("currency_offer")
                .filter(|v| v.is_object())
                .into_iter()
                .chain(data_list(&model, "currencies"))
                .map(|raw| offer_from(raw, "amount"))
                .collect()
        }
        ListingCategory::Item => data_list(&model, "items")
            .map(|raw| offer_from(raw, "value"))
            .collect(),
        ListingCategory::Account => data_list(&model, "accounts")
            .map(|raw| offer_from(raw, "value"))
            .collect(),
    }
}
