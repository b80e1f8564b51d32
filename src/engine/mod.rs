//! Core engine: the load → crawl → decide → update → note cycle.
//!
//! - `processor`: one listing through its per-cycle state machine
//! - `pool`: N workers draining the batch queue
//! - `notes`: audit note rendering
//! - `report`: cycle summaries

pub mod notes;
pub mod pool;
pub mod processor;
pub mod report;

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::sheets::cache::{ConfigCache, FlushReport};
use crate::sheets::rows::RowStore;
use crate::types::RepricerError;
use pool::{PoolReport, WorkerPool};
use report::CycleReport;

/// Runs complete cycles over the listings selected on the main sheet.
pub struct Repricer {
    cache: Arc<ConfigCache>,
    rows: RowStore,
    pool: WorkerPool,
    refresh_each_cycle: bool,
}

impl Repricer {
    pub fn new(
        cache: Arc<ConfigCache>,
        rows: RowStore,
        pool: WorkerPool,
        refresh_each_cycle: bool,
    ) -> Self {
        Self {
            cache,
            rows,
            pool,
            refresh_each_cycle,
        }
    }

    /// One cycle: select rows, process them, flush every staged note.
    ///
    /// Only a failure to read the main sheet aborts the cycle; listing
    /// errors end up in the report.
    pub async fn run_cycle(&self, cycle: u64) -> Result<(CycleReport, PoolReport), RepricerError> {
        let started_at = Utc::now();
        info!(cycle, "Starting cycle");

        if self.refresh_each_cycle {
            self.cache.invalidate().await;
        }
        self.cache.add_sheet(self.rows.main_sheet()).await?;

        let indices = self.rows.run_indices().await?;
        info!(cycle, listings = indices.len(), "Listings selected");

        let pool_report = self.pool.run(indices).await;
        let flush = self.flush().await;
        let dirty = self.cache.dirty_count().await;

        let report = CycleReport::build(cycle, started_at, &pool_report, &flush, dirty);
        Ok((report, pool_report))
    }

    /// Write back everything staged so far.
    pub async fn flush(&self) -> FlushReport {
        self.cache.flush(None).await
    }
}
