//! Audit note rendering.
//!
//! Every processed row gets a note and a last-update timestamp written
//! back to the sheet. Notes start with the local timestamp and are meant
//! for the operator reading the sheet, not for parsing.

use chrono::{DateTime, Local};
use rust_decimal::Decimal;

use crate::types::{DecisionReason, ListingConfig, ListingState, Offer, PricingDecision};

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

fn opt_price(p: Option<Decimal>) -> String {
    p.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
}

fn sellers(offers: &[Offer]) -> String {
    if offers.is_empty() {
        return "none".into();
    }
    offers
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn bounds(config: &ListingConfig) -> String {
    format!(
        "Min = {}, Max = {}",
        config.min_price,
        opt_price(config.max_price)
    )
}

/// Note for a listing whose price was pushed to the marketplace.
pub fn updated(
    ts: &str,
    config: &ListingConfig,
    decision: &PricingDecision,
    crawl_error: Option<&str>,
) -> String {
    let mut note = format!("{ts}: Price updated; Price = {}", decision.target_price);
    if let Some(stock) = config.stock.filter(|_| config.category.tracks_stock()) {
        note.push_str(&format!("; Stock = {stock}"));
    }
    note.push_str(&format!("; {}", bounds(config)));

    match decision.reason {
        DecisionReason::Undercut => {
            if let Some(best) = &decision.compare_offer {
                note.push_str(&format!("; Compared = {best}"));
            }
        }
        DecisionReason::NoValidCompetitor => note.push_str("; No valid competitor"),
        DecisionReason::NoCompare => note.push_str("; Comparison disabled"),
        DecisionReason::AlreadyLowest => {}
    }
    if let Some(err) = crawl_error {
        note.push_str(&format!("; Crawl failed: {err}"));
    }
    if decision.reason != DecisionReason::NoCompare {
        note.push_str(&format!("\nCheaper sellers: {}", sellers(&decision.lower_offers)));
    }
    note
}

/// Note for a listing left untouched because it is already well placed.
pub fn skipped(ts: &str, config: &ListingConfig, decision: &PricingDecision) -> String {
    let compared = decision
        .compare_offer
        .as_ref()
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "{ts}: Already lowest, price kept; Own = {}; {}; Compared = {compared}\nCheaper sellers: {}",
        opt_price(decision.own_price),
        bounds(config),
        sellers(&decision.lower_offers),
    )
}

/// Note for a listing that failed this cycle.
pub fn failed(ts: &str, state: ListingState, error: &str) -> String {
    format!("{ts}: Error ({state}): {error}")
}
