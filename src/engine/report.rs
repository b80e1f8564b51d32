//! Cycle reporting.
//!
//! Folds the pool outcome and the end-of-cycle flush into one summary the
//! run loop logs.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, warn};

use super::pool::PoolReport;
use crate::sheets::cache::FlushReport;
use crate::types::ListingOutcome;

/// Summary of a complete cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listings: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out_workers: usize,
    pub cells_flushed: usize,
    pub flush_failures: usize,
    /// Entries still waiting for a successful flush.
    pub cells_still_dirty: usize,
}

impl CycleReport {
    pub fn build(
        cycle: u64,
        started_at: DateTime<Utc>,
        pool: &PoolReport,
        flush: &FlushReport,
        cells_still_dirty: usize,
    ) -> Self {
        Self {
            cycle,
            started_at,
            finished_at: Utc::now(),
            listings: pool.outcomes.len(),
            updated: pool.updated(),
            skipped: pool.skipped(),
            failed: pool.failed(),
            timed_out_workers: pool.timed_out_workers,
            cells_flushed: flush.cells_written,
            flush_failures: flush.failed.len(),
            cells_still_dirty,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle {} | listings: {} | updated: {} | skipped: {} | failed: {} | flushed: {} | dirty: {}",
            self.cycle,
            self.listings,
            self.updated,
            self.skipped,
            self.failed,
            self.cells_flushed,
            self.cells_still_dirty,
        )
    }
}

/// Log a cycle summary plus one line per failed listing.
pub fn log_cycle_report(report: &CycleReport, pool: &PoolReport) {
    for outcome in &pool.outcomes {
        if let ListingOutcome::Failed { index, state, error } = outcome {
            warn!(cycle = report.cycle, index, %state, error = %error, "Listing failed this cycle");
        }
    }
    info!(
        cycle = report.cycle,
        listings = report.listings,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        timed_out_workers = report.timed_out_workers,
        flushed = report.cells_flushed,
        flush_failures = report.flush_failures,
        dirty = report.cells_still_dirty,
        secs = report.duration_secs(),
        "Cycle complete"
    );
}
