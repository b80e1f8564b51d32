//! Read-through / write-back cache over the spreadsheet store.
//!
//! Shields pricing from the store's latency and rate limits:
//! - the first touch of a sheet bulk-loads the whole sheet in one read
//! - local writes only mark entries dirty; nothing hits the network
//! - `flush` coalesces every dirty entry of a sheet into one batch write
//!
//! Each sheet sits behind its own async lock, so concurrent first touches
//! of the same sheet share a single load. Dirty entries survive reloads
//! and failed flushes; an update is deferred, never dropped.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::a1::{A1Range, CellRef};
use super::{RangeUpdate, SheetStore};
use crate::retry::RetryPolicy;
use crate::types::{CellAddress, RepricerError, SheetKey};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One cached cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub address: CellAddress,
    pub value: String,
    /// Set between a local write and the next successful flush.
    pub dirty: bool,
    pub loaded_at: DateTime<Utc>,
    /// Bumped on every local write; a flush only clears the version it sent.
    version: u64,
}

#[derive(Default)]
struct SheetState {
    loaded: bool,
    cells: HashMap<CellRef, CacheEntry>,
}

/// Outcome of a flush across all touched sheets.
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    pub sheets_written: usize,
    pub cells_written: usize,
    pub failed: Vec<(SheetKey, String)>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct ConfigCache {
    store: Arc<dyn SheetStore>,
    retry: RetryPolicy,
    sheets: Mutex<HashMap<SheetKey, Arc<tokio::sync::Mutex<SheetState>>>>,
    next_version: AtomicU64,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn SheetStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            sheets: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    fn sheet_handle(&self, key: &SheetKey) -> Arc<tokio::sync::Mutex<SheetState>> {
        let mut sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        sheets.entry(key.clone()).or_default().clone()
    }

    fn handles(&self) -> Vec<(SheetKey, Arc<tokio::sync::Mutex<SheetState>>)> {
        let sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = sheets.iter().map(|(k, h)| (k.clone(), h.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn parse_cell(address: &CellAddress) -> Result<CellRef, RepricerError> {
        CellRef::parse(&address.cell)
            .ok_or_else(|| RepricerError::Validation(format!("invalid cell address {address}")))
    }

    /// Bulk-load a sheet unless it is already loaded.
    pub async fn add_sheet(&self, key: &SheetKey) -> Result<(), RepricerError> {
        let handle = self.sheet_handle(key);
        let mut state = handle.lock().await;
        if !state.loaded {
            self.load_into(key, &mut state).await?;
        }
        Ok(())
    }

    /// One bulk read of the whole sheet. Dirty entries are kept as-is.
    async fn load_into(&self, key: &SheetKey, state: &mut SheetState) -> Result<(), RepricerError> {
        let grid = self
            .retry
            .run("sheets.read", || {
                self.store.read_range(&key.sheet_id, &key.sheet_name, None)
            })
            .await?;

        let now = Utc::now();
        state.cells.retain(|_, entry| entry.dirty);

        let mut loaded = 0usize;
        for (r, row) in grid.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let cref = CellRef::new(c as u32 + 1, r as u32 + 1);
                if state.cells.contains_key(&cref) {
                    continue;
                }
                state.cells.insert(
                    cref,
                    CacheEntry {
                        address: key.cell(cref.to_a1()),
                        value,
                        dirty: false,
                        loaded_at: now,
                        version: 0,
                    },
                );
                loaded += 1;
            }
        }

        state.loaded = true;
        info!(sheet = %key, cells = loaded, "Sheet loaded into cache");
        Ok(())
    }

    /// Cached value of a cell; `None` when the cell is blank.
    ///
    /// A locally written value is returned without touching the store.
    pub async fn get_value(&self, address: &CellAddress) -> Result<Option<String>, RepricerError> {
        let cref = Self::parse_cell(address)?;
        let key = address.sheet();
        let handle = self.sheet_handle(&key);
        let mut state = handle.lock().await;

        if let Some(entry) = state.cells.get(&cref).filter(|e| e.dirty) {
            return Ok(non_empty(&entry.value));
        }
        if !state.loaded {
            self.load_into(&key, &mut state).await?;
        }
        Ok(state.cells.get(&cref).and_then(|e| non_empty(&e.value)))
    }

    /// Non-blank cells inside `range`, in row-major order.
    pub async fn get_range(
        &self,
        key: &SheetKey,
        range: &str,
    ) -> Result<Vec<(CellRef, String)>, RepricerError> {
        let range = A1Range::parse(range).ok_or_else(|| {
            RepricerError::Validation(format!("invalid range {range} on {key}"))
        })?;
        let handle = self.sheet_handle(key);
        let mut state = handle.lock().await;
        if !state.loaded {
            self.load_into(key, &mut state).await?;
        }

        let mut cells: Vec<(CellRef, String)> = state
            .cells
            .iter()
            .filter(|(cref, e)| range.contains(cref) && !e.value.is_empty())
            .map(|(cref, e)| (*cref, e.value.clone()))
            .collect();
        cells.sort_by_key(|(cref, _)| *cref);
        Ok(cells)
    }

    /// Write a value locally and mark it dirty. No network call.
    pub async fn update_value(
        &self,
        address: &CellAddress,
        value: impl Into<String>,
    ) -> Result<(), RepricerError> {
        let cref = Self::parse_cell(address)?;
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let value = value.into();

        let handle = self.sheet_handle(&address.sheet());
        let mut state = handle.lock().await;
        let entry = state.cells.entry(cref).or_insert_with(|| CacheEntry {
            address: address.clone(),
            value: String::new(),
            dirty: false,
            loaded_at: Utc::now(),
            version: 0,
        });
        entry.value = value;
        entry.dirty = true;
        entry.version = version;

        debug!(address = %address, "Cache entry updated");
        Ok(())
    }

    /// Snapshot of a cached entry, without loading anything.
    pub async fn entry(&self, address: &CellAddress) -> Option<CacheEntry> {
        let cref = CellRef::parse(&address.cell)?;
        let handle = self.sheet_handle(&address.sheet());
        let state = handle.lock().await;
        state.cells.get(&cref).cloned()
    }

    /// Mark every sheet stale; the next touch reloads it. Dirty entries
    /// are preserved across the reload.
    pub async fn invalidate(&self) {
        for (_, handle) in self.handles() {
            handle.lock().await.loaded = false;
        }
        debug!("Cache invalidated");
    }

    /// Number of entries waiting for a flush.
    pub async fn dirty_count(&self) -> usize {
        let mut count = 0;
        for (_, handle) in self.handles() {
            count += handle.lock().await.cells.values().filter(|e| e.dirty).count();
        }
        count
    }

    /// Write dirty entries back to the store, one batch call per sheet.
    ///
    /// With `only`, just those addresses are considered. A sheet whose write
    /// fails after retries keeps its entries dirty for the next flush.
    pub async fn flush(&self, only: Option<&[CellAddress]>) -> FlushReport {
        let wanted: Option<HashMap<SheetKey, HashSet<CellRef>>> = only.map(|addresses| {
            let mut by_sheet: HashMap<SheetKey, HashSet<CellRef>> = HashMap::new();
            for address in addresses {
                match CellRef::parse(&address.cell) {
                    Some(cref) => {
                        by_sheet.entry(address.sheet()).or_default().insert(cref);
                    }
                    None => warn!(address = %address, "Skipping invalid address in flush"),
                }
            }
            by_sheet
        });

        let mut report = FlushReport::default();

        for (key, handle) in self.handles() {
            let filter = match &wanted {
                Some(w) => match w.get(&key) {
                    Some(cells) => Some(cells),
                    None => continue,
                },
                None => None,
            };

            let mut batch: Vec<(CellRef, String, u64)> = {
                let state = handle.lock().await;
                state
                    .cells
                    .iter()
                    .filter(|(cref, e)| e.dirty && filter.map_or(true, |f| f.contains(*cref)))
                    .map(|(cref, e)| (*cref, e.value.clone(), e.version))
                    .collect()
            };
            if batch.is_empty() {
                continue;
            }
            batch.sort_by_key(|(cref, _, _)| *cref);

            let updates: Vec<RangeUpdate> = batch
                .iter()
                .map(|(cref, value, _)| RangeUpdate {
                    range: cref.to_a1(),
                    value: value.clone(),
                })
                .collect();

            let result = self
                .retry
                .run("sheets.write", || {
                    self.store.write_batch(&key.sheet_id, &key.sheet_name, &updates)
                })
                .await;

            match result {
                Ok(()) => {
                    let mut state = handle.lock().await;
                    for (cref, _, version) in &batch {
                        if let Some(entry) = state.cells.get_mut(cref) {
                            // rewritten while the write was in flight: keep dirty
                            if entry.version == *version {
                                entry.dirty = false;
                            }
                        }
                    }
                    report.sheets_written += 1;
                    report.cells_written += batch.len();
                    debug!(sheet = %key, cells = batch.len(), "Sheet flushed");
                }
                Err(e) => {
                    warn!(sheet = %key, cells = batch.len(), error = %e, "Flush failed, entries stay dirty");
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }

        if report.cells_written > 0 || !report.failed.is_empty() {
            info!(
                sheets = report.sheets_written,
                cells = report.cells_written,
                failed_sheets = report.failed.len(),
                "Cache flush complete"
            );
        }
        report
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
