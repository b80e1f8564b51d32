//! Competitor offer filtering and selection.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::types::Offer;

/// Case-insensitive substring match of any keyword against the title.
fn title_matches_any(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords.iter().any(|k| title.contains(&k.to_lowercase()))
}

/// Keep the offers a listing may compete against, in crawl order.
///
/// An offer is dropped when its seller is blacklisted, when include
/// keywords are set and none appears in the title, when any exclude
/// keyword appears in the title, or when its price is out of bounds.
/// With a max price the bounds are inclusive on both ends; without one
/// only offers below `min_price` are dropped.
pub fn filter_valid_offers(
    offers: &[Offer],
    min_price: Decimal,
    max_price: Option<Decimal>,
    blacklist: &HashSet<String>,
    include_keywords: Option<&[String]>,
    exclude_keywords: Option<&[String]>,
) -> Vec<Offer> {
    offers
        .iter()
        .filter(|o| !blacklist.contains(&o.seller))
        .filter(|o| match include_keywords {
            Some(kw) if !kw.is_empty() => title_matches_any(&o.title, kw),
            _ => true,
        })
        .filter(|o| match exclude_keywords {
            Some(kw) if !kw.is_empty() => !title_matches_any(&o.title, kw),
            _ => true,
        })
        .filter(|o| match max_price {
            Some(max) => o.price >= min_price && o.price <= max,
            None => o.price >= min_price,
        })
        .cloned()
        .collect()
}

/// The cheapest offer; ties keep the first one seen.
pub fn find_offer_min_price(offers: &[Offer]) -> Option<&Offer> {
    offers.iter().fold(None, |best: Option<&Offer>, o| match best {
        Some(b) if b.price <= o.price => Some(b),
        _ => Some(o),
    })
}

/// Offers priced strictly below `threshold`, in input order.
pub fn find_lower_price_offers(offers: &[Offer], threshold: Decimal) -> Vec<Offer> {
    offers
        .iter()
        .filter(|o| o.price < threshold)
        .cloned()
        .collect()
}
