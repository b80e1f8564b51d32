//! Spreadsheet-backed configuration and audit storage.
//!
//! Defines the `SheetStore` trait (bulk read / bulk write against the
//! external store) and the layers built on top of it:
//! - `cache`: read-through/write-back cache shared by all workers
//! - `rows`: typed listing rows over the cache
//! - `google`: Google Sheets v4 REST implementation of `SheetStore`

pub mod a1;
pub mod cache;
pub mod google;
pub mod rows;

use async_trait::async_trait;

use crate::types::RepricerError;

/// One cell write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeUpdate {
    /// A1 cell on the target sheet, without a sheet prefix.
    pub range: String,
    pub value: String,
}

/// Bulk primitives of the external spreadsheet store.
///
/// The store is slow and rate-limited, so callers must never issue one
/// request per cell: reads fetch whole sheets, writes carry every dirty
/// cell of a sheet in one call.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Read a range as a row-major grid of cell values, starting at the
    /// range's top-left cell. `None` reads the whole sheet from `A1`.
    async fn read_range(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        range: Option<&str>,
    ) -> Result<Vec<Vec<String>>, RepricerError>;

    /// Write many single-cell ranges on one sheet in a single call.
    async fn write_batch(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), RepricerError>;
}
