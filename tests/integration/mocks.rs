//! In-memory collaborators for integration testing.
//!
//! Deterministic implementations of the spreadsheet store, the crawler
//! and the marketplace, with call recording and fault injection. No
//! network access.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repricer::crawler::{CrawlSession, Crawler};
use repricer::engine::pool::{PoolSettings, WorkerPool};
use repricer::engine::processor::ListingProcessor;
use repricer::engine::Repricer;
use repricer::marketplace::{MarketplaceClient, OfferAck};
use repricer::pricing::{FallbackPrice, PricingEngine};
use repricer::retry::RetryPolicy;
use repricer::sheets::a1::{column_index, CellRef};
use repricer::sheets::cache::ConfigCache;
use repricer::sheets::rows::{RowSchema, RowStore};
use repricer::sheets::{RangeUpdate, SheetStore};
use repricer::types::{ListingCategory, Offer, RepricerError, SheetKey};

pub const MAIN_ID: &str = "main-book";
pub const MAIN_NAME: &str = "Listings";
pub const CFG_ID: &str = "cfg-book";
pub const BOUNDS: &str = "Bounds";
pub const BLACKLIST: &str = "Blacklist";
pub const OWN_SELLER: &str = "me";

pub fn offer(seller: &str, price: Decimal) -> Offer {
    Offer {
        seller: seller.to_string(),
        price,
        title: "Gold coins".to_string(),
        id: None,
    }
}

// ---------------------------------------------------------------------------
// Sheet store
// ---------------------------------------------------------------------------

type Key = (String, String);

/// Grid-backed store. Writes are applied to the grids and logged.
#[derive(Default)]
pub struct MemoryStore {
    grids: Mutex<HashMap<Key, Vec<Vec<String>>>>,
    pub reads: AtomicUsize,
    writes: Mutex<Vec<(Key, Vec<RangeUpdate>)>>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_grid(&self, sheet_id: &str, sheet_name: &str, grid: Vec<Vec<String>>) {
        self.grids
            .lock()
            .unwrap()
            .insert((sheet_id.to_string(), sheet_name.to_string()), grid);
    }

    /// Current value of a cell, blank when absent.
    pub fn cell(&self, sheet_id: &str, sheet_name: &str, a1: &str) -> String {
        let cref = CellRef::parse(a1).unwrap();
        let grids = self.grids.lock().unwrap();
        grids
            .get(&(sheet_id.to_string(), sheet_name.to_string()))
            .and_then(|g| g.get(cref.row as usize - 1))
            .and_then(|r| r.get(cref.col as usize - 1))
            .cloned()
            .unwrap_or_default()
    }

    pub fn write_calls(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn write_calls_for(&self, sheet_name: &str) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|((_, name), _)| name == sheet_name)
            .count()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }
}

#[async_trait]
impl SheetStore for MemoryStore {
    async fn read_range(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        _range: Option<&str>,
    ) -> Result<Vec<Vec<String>>, RepricerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .grids
            .lock()
            .unwrap()
            .get(&(sheet_id.to_string(), sheet_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_batch(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), RepricerError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(RepricerError::network("memory-sheets", "HTTP 503"));
        }
        let key = (sheet_id.to_string(), sheet_name.to_string());
        {
            let mut grids = self.grids.lock().unwrap();
            let grid = grids.entry(key.clone()).or_default();
            for u in updates {
                let cref = CellRef::parse(&u.range).unwrap();
                let (r, c) = (cref.row as usize - 1, cref.col as usize - 1);
                if grid.len() <= r {
                    grid.resize(r + 1, Vec::new());
                }
                if grid[r].len() <= c {
                    grid[r].resize(c + 1, String::new());
                }
                grid[r][c] = u.value.clone();
            }
        }
        self.writes.lock().unwrap().push((key, updates.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Main-sheet rows
// ---------------------------------------------------------------------------

/// One listing row in the standard column layout.
#[derive(Clone)]
pub struct RowSpec {
    pub flag: &'static str,
    pub name: String,
    pub category: &'static str,
    pub ids: String,
    pub compare: &'static str,
    pub url: String,
    pub discount_min: &'static str,
    pub discount_max: &'static str,
    pub digits: &'static str,
    /// Cells on the bounds sheet.
    pub min_cell: String,
    pub max_cell: Option<String>,
    pub stock_cell: Option<String>,
    /// Range on the blacklist sheet.
    pub blacklist: Option<&'static str>,
    pub relax: &'static str,
}

impl RowSpec {
    /// A comparing currency row whose bounds live on row `row` of the
    /// bounds sheet.
    pub fn currency(row: u32) -> Self {
        Self {
            flag: "1",
            name: format!("Listing {row}"),
            category: "Currency",
            ids: format!("{row}"),
            compare: "1",
            url: format!("https://market.test/offers/{row}"),
            discount_min: "0.10",
            discount_max: "0.50",
            digits: "2",
            min_cell: format!("A{row}"),
            max_cell: Some(format!("B{row}")),
            stock_cell: Some(format!("C{row}")),
            blacklist: None,
            relax: "0",
        }
    }

    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![String::new(); 26];
        let mut set = |col: &str, value: &str| {
            cells[column_index(col).unwrap() as usize - 1] = value.to_string();
        };
        set("A", self.flag);
        set("B", &self.name);
        set("E", self.category);
        set("F", &self.ids);
        set("G", self.compare);
        set("H", &self.url);
        set("I", self.discount_min);
        set("J", self.discount_max);
        set("K", self.digits);
        set("L", CFG_ID);
        set("M", BOUNDS);
        set("N", &self.min_cell);
        if let Some(max) = &self.max_cell {
            set("O", CFG_ID);
            set("P", BOUNDS);
            set("Q", max);
        }
        if let Some(stock) = &self.stock_cell {
            set("R", CFG_ID);
            set("S", BOUNDS);
            set("T", stock);
        }
        if let Some(range) = self.blacklist {
            set("U", CFG_ID);
            set("V", BLACKLIST);
            set("W", range);
        }
        set("X", self.relax);
        cells
    }
}

/// Main-sheet grid: a header row followed by `rows` (row 2 onwards).
pub fn main_grid(rows: &[RowSpec]) -> Vec<Vec<String>> {
    let header = ["RUN", "NAME", "NOTE", "LAST UPDATE", "CATEGORY"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    std::iter::once(header)
        .chain(rows.iter().map(RowSpec::cells))
        .collect()
}

/// Bounds-sheet grid with `(min, max, stock)` on the given rows.
pub fn bounds_grid(entries: &[(u32, &str, &str, &str)]) -> Vec<Vec<String>> {
    let last = entries.iter().map(|e| e.0).max().unwrap_or(0) as usize;
    let mut grid = vec![Vec::new(); last];
    for (row, min, max, stock) in entries {
        grid[*row as usize - 1] = vec![min.to_string(), max.to_string(), stock.to_string()];
    }
    grid
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum PageScript {
    Offers(Vec<Offer>),
    Fail(String),
    Panic,
    Hang,
}

/// Serves scripted pages by URL. Unknown URLs have no offers.
#[derive(Default)]
pub struct ScriptedCrawler {
    pages: Mutex<HashMap<String, PageScript>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, url: &str, script: PageScript) {
        self.pages.lock().unwrap().insert(url.to_string(), script);
    }
}

#[async_trait]
impl Crawler for ScriptedCrawler {
    async fn open_session(&self) -> Result<Box<dyn CrawlSession>, RepricerError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            pages: self.pages.lock().unwrap().clone(),
            closed: self.closed.clone(),
            fetched: self.fetched.clone(),
        }))
    }
}

struct ScriptedSession {
    pages: HashMap<String, PageScript>,
    closed: Arc<AtomicUsize>,
    fetched: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl CrawlSession for ScriptedSession {
    async fn extract(
        &mut self,
        _category: ListingCategory,
        url: &str,
    ) -> Result<Vec<Offer>, RepricerError> {
        self.fetched.lock().unwrap().push(url.to_string());
        match self.pages.get(url).cloned() {
            None => Ok(Vec::new()),
            Some(PageScript::Offers(offers)) => Ok(offers),
            Some(PageScript::Fail(msg)) => Err(RepricerError::Crawl(msg)),
            Some(PageScript::Panic) => panic!("crawler blew up on {url}"),
            Some(PageScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Marketplace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    pub category: ListingCategory,
    pub listing_id: String,
    pub price: Decimal,
    pub stock: Option<u32>,
}

/// Records every update; listing ids in `failing` always fail.
#[derive(Default)]
pub struct RecordingMarketplace {
    calls: Mutex<Vec<UpdateCall>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_listing(&self, listing_id: &str) {
        self.failing.lock().unwrap().insert(listing_id.to_string());
    }

    pub fn calls(&self) -> Vec<UpdateCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, listing_id: &str) -> Vec<UpdateCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.listing_id == listing_id)
            .collect()
    }
}

#[async_trait]
impl MarketplaceClient for RecordingMarketplace {
    async fn update_offer(
        &self,
        category: ListingCategory,
        listing_id: &str,
        price: Decimal,
        stock: Option<u32>,
    ) -> Result<OfferAck, RepricerError> {
        self.calls.lock().unwrap().push(UpdateCall {
            category,
            listing_id: listing_id.to_string(),
            price,
            stock,
        });
        if self.failing.lock().unwrap().contains(listing_id) {
            return Err(RepricerError::network("memory-market", "HTTP 502"));
        }
        Ok(OfferAck {
            listing_id: listing_id.to_string(),
            price,
            stock,
            reference: format!("mem-{listing_id}"),
            dry_run: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The engine wired over the in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub crawler: Arc<ScriptedCrawler>,
    pub market: Arc<RecordingMarketplace>,
    pub cache: Arc<ConfigCache>,
    pub rows: RowStore,
}

impl Harness {
    pub fn new(store: MemoryStore, crawler: ScriptedCrawler, market: RecordingMarketplace) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(ConfigCache::new(store.clone(), RetryPolicy::none()));
        let rows = RowStore::new(
            cache.clone(),
            SheetKey::new(MAIN_ID, MAIN_NAME),
            RowSchema::standard().unwrap(),
            vec!["1".to_string()],
        );
        Self {
            store,
            crawler: Arc::new(crawler),
            market: Arc::new(market),
            cache,
            rows,
        }
    }

    pub fn settings(workers: usize) -> PoolSettings {
        PoolSettings {
            workers,
            join_timeout: Duration::from_secs(5),
            flush_interval: None,
        }
    }

    pub fn pool(&self, settings: PoolSettings) -> WorkerPool {
        let processor = ListingProcessor::new(
            self.rows.clone(),
            PricingEngine::new(Some(OWN_SELLER.to_string()), FallbackPrice::MaxOrMin),
            self.market.clone(),
            RetryPolicy::new(1, Duration::from_millis(1), repricer::retry::Backoff::Fixed),
        );
        WorkerPool::new(
            Arc::new(processor),
            self.crawler.clone(),
            self.cache.clone(),
            settings,
        )
    }

    pub fn repricer(&self, settings: PoolSettings) -> Repricer {
        Repricer::new(self.cache.clone(), self.rows.clone(), self.pool(settings), true)
    }

    pub fn main_cell(&self, a1: &str) -> String {
        self.store.cell(MAIN_ID, MAIN_NAME, a1)
    }
}
