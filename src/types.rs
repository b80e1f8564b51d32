//! Shared types for the repricer.
//!
//! These types form the data model used across all modules: store
//! addresses, listing configuration, crawled offers, pricing decisions
//! and the error taxonomy. They carry no I/O so that the cache, pricing
//! and engine modules can depend on them without circular references.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Store addressing
// ---------------------------------------------------------------------------

/// One tab of one spreadsheet. The unit of bulk load and bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetKey {
    pub sheet_id: String,
    pub sheet_name: String,
}

impl SheetKey {
    pub fn new(sheet_id: impl Into<String>, sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    /// Address of a single cell on this sheet.
    pub fn cell(&self, cell: impl Into<String>) -> CellAddress {
        CellAddress {
            sheet_id: self.sheet_id.clone(),
            sheet_name: self.sheet_name.clone(),
            cell: cell.into(),
        }
    }
}

impl fmt::Display for SheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.sheet_id, self.sheet_name)
    }
}

/// Opaque key into the external store: a single A1 cell on one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet_id: String,
    pub sheet_name: String,
    pub cell: String,
}

impl CellAddress {
    pub fn new(
        sheet_id: impl Into<String>,
        sheet_name: impl Into<String>,
        cell: impl Into<String>,
    ) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            sheet_name: sheet_name.into(),
            cell: cell.into(),
        }
    }

    pub fn sheet(&self) -> SheetKey {
        SheetKey::new(self.sheet_id.clone(), self.sheet_name.clone())
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}->{}", self.sheet_id, self.sheet_name, self.cell)
    }
}

// ---------------------------------------------------------------------------
// Listing configuration
// ---------------------------------------------------------------------------

/// Marketplace offer family. Each has its own crawl page shape and its
/// own update endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingCategory {
    Currency,
    Item,
    Account,
}

impl ListingCategory {
    /// Parse the category cell. Accepts singular and plural, any case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "currency" | "currencies" => Some(Self::Currency),
            "item" | "items" => Some(Self::Item),
            "account" | "accounts" => Some(Self::Account),
            _ => None,
        }
    }

    /// REST collection name on the marketplace API.
    pub fn offers_path(&self) -> &'static str {
        match self {
            Self::Currency => "currency-offers",
            Self::Item => "item-offers",
            Self::Account => "account-offers",
        }
    }

    /// Whether the marketplace accepts a stock figure for this family.
    pub fn tracks_stock(&self) -> bool {
        !matches!(self, Self::Account)
    }
}

impl fmt::Display for ListingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Currency => write!(f, "currency"),
            Self::Item => write!(f, "item"),
            Self::Account => write!(f, "account"),
        }
    }
}

/// How a listing reacts to competitor prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareMode {
    /// Never crawl; always list at the minimum price.
    Disabled,
    /// Always undercut the cheapest valid competitor.
    Compare,
    /// Undercut unless our own offer already sits just below the cheapest.
    CompareIfWorse,
}

impl CompareMode {
    /// Parse the compare-flag cell: blank or `0` disables, `1` compares,
    /// `2` compares only when we are not already the cheapest.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim).unwrap_or("") {
            "" | "0" => Some(Self::Disabled),
            "1" => Some(Self::Compare),
            "2" => Some(Self::CompareIfWorse),
            _ => None,
        }
    }
}

/// Fully resolved configuration of one listing row for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingConfig {
    /// 1-based row number on the main sheet.
    pub index: u32,
    pub name: String,
    pub category: ListingCategory,
    /// Marketplace offer ids this row controls (accounts may list several).
    pub listing_ids: Vec<String>,
    pub compare_url: String,
    pub min_price: Decimal,
    pub max_price: Option<Decimal>,
    pub stock: Option<u32>,
    pub blacklist: HashSet<String>,
    pub include_keywords: Option<Vec<String>>,
    pub exclude_keywords: Option<Vec<String>>,
    pub discount_min: Decimal,
    pub discount_max: Decimal,
    pub rounding_digits: u32,
    pub relax_time_secs: f64,
    pub compare_mode: CompareMode,
}

// ---------------------------------------------------------------------------
// Offers and decisions
// ---------------------------------------------------------------------------

/// A crawled competitor offer. Crawl order is preserved by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub seller: String,
    pub price: Decimal,
    pub title: String,
    pub id: Option<String>,
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.seller, self.price)
    }
}

/// Outstanding audit write for one row. Latest write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub index: u32,
    pub note: String,
    pub last_update: String,
}

/// Why the engine chose a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    NoCompare,
    NoValidCompetitor,
    AlreadyLowest,
    Undercut,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCompare => "no-compare",
            Self::NoValidCompetitor => "no-valid-competitor",
            Self::AlreadyLowest => "already-lowest",
            Self::Undercut => "undercut",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the pricing engine for one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingDecision {
    pub target_price: Decimal,
    pub compare_offer: Option<Offer>,
    pub skipped: bool,
    pub reason: DecisionReason,
    /// Our own crawled price, when the page listed it.
    pub own_price: Option<Decimal>,
    /// Competitors strictly cheaper than the target (own seller excluded).
    pub lower_offers: Vec<Offer>,
}

// ---------------------------------------------------------------------------
// Per-listing lifecycle
// ---------------------------------------------------------------------------

/// Processing state of one listing within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingState {
    NeedsCrawl,
    Crawled,
    Filtered,
    Decided,
    Updated,
    Failed,
}

impl fmt::Display for ListingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NeedsCrawl => "needs-crawl",
            Self::Crawled => "crawled",
            Self::Filtered => "filtered",
            Self::Decided => "decided",
            Self::Updated => "updated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal result of processing one index in a cycle.
#[derive(Debug, Clone)]
pub enum ListingOutcome {
    Updated {
        index: u32,
        decision: PricingDecision,
    },
    Skipped {
        index: u32,
        decision: PricingDecision,
    },
    Failed {
        index: u32,
        /// Last state reached before the failure.
        state: ListingState,
        error: String,
    },
}

impl ListingOutcome {
    pub fn index(&self) -> u32 {
        match self {
            Self::Updated { index, .. } | Self::Skipped { index, .. } | Self::Failed { index, .. } => {
                *index
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Listing-scoped error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepricerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crawl error: {0}")]
    Crawl(String),

    #[error("Network error ({service}): {message}")]
    Network { service: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl RepricerError {
    pub fn network(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Only I/O failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
