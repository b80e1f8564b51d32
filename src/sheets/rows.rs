//! Typed listing rows over the config cache.
//!
//! The main sheet holds one listing per row. Which column backs which
//! field is declared once in [`LISTING_SCHEMA`] and validated at startup.
//! Price bounds, stock and blacklist are indirect: the row stores a
//! (sheet id, sheet name, cell) triple pointing at the real value, which
//! is resolved through the same cache.

use rust_decimal::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::a1::column_index;
use super::cache::ConfigCache;
use crate::types::{
    CellAddress, CompareMode, ListingCategory, ListingConfig, PendingUpdate, RepricerError,
    SheetKey,
};

/// Rounding beyond this many digits is rejected as a typo.
const MAX_ROUNDING_DIGITS: u32 = 8;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingField {
    RunFlag,
    Name,
    Note,
    LastUpdate,
    Category,
    ListingIds,
    CompareFlag,
    CompareUrl,
    DiscountMin,
    DiscountMax,
    RoundingDigits,
    MinSheetId,
    MinSheetName,
    MinCell,
    MaxSheetId,
    MaxSheetName,
    MaxCell,
    StockSheetId,
    StockSheetName,
    StockCell,
    BlacklistSheetId,
    BlacklistSheetName,
    BlacklistRange,
    RelaxTime,
    IncludeKeywords,
    ExcludeKeywords,
}

/// Binds one field to its column on the main sheet.
#[derive(Debug, Clone, Copy)]
pub struct FieldBinding {
    pub field: ListingField,
    pub column: &'static str,
    /// Loading fails with a config error when the cell is blank.
    pub required: bool,
    /// Written back by the repricer (audit fields).
    pub writable: bool,
}

const fn bind(field: ListingField, column: &'static str, required: bool) -> FieldBinding {
    FieldBinding { field, column, required, writable: false }
}

const fn audit(field: ListingField, column: &'static str) -> FieldBinding {
    FieldBinding { field, column, required: false, writable: true }
}

/// Column layout of the main sheet.
pub const LISTING_SCHEMA: &[FieldBinding] = &[
    bind(ListingField::RunFlag, "A", false),
    bind(ListingField::Name, "B", true),
    audit(ListingField::Note, "C"),
    audit(ListingField::LastUpdate, "D"),
    bind(ListingField::Category, "E", true),
    bind(ListingField::ListingIds, "F", true),
    bind(ListingField::CompareFlag, "G", false),
    bind(ListingField::CompareUrl, "H", false),
    bind(ListingField::DiscountMin, "I", true),
    bind(ListingField::DiscountMax, "J", true),
    bind(ListingField::RoundingDigits, "K", true),
    bind(ListingField::MinSheetId, "L", true),
    bind(ListingField::MinSheetName, "M", true),
    bind(ListingField::MinCell, "N", true),
    bind(ListingField::MaxSheetId, "O", false),
    bind(ListingField::MaxSheetName, "P", false),
    bind(ListingField::MaxCell, "Q", false),
    bind(ListingField::StockSheetId, "R", false),
    bind(ListingField::StockSheetName, "S", false),
    bind(ListingField::StockCell, "T", false),
    bind(ListingField::BlacklistSheetId, "U", false),
    bind(ListingField::BlacklistSheetName, "V", false),
    bind(ListingField::BlacklistRange, "W", false),
    bind(ListingField::RelaxTime, "X", true),
    bind(ListingField::IncludeKeywords, "Y", false),
    bind(ListingField::ExcludeKeywords, "Z", false),
];

/// Validated field → column lookup.
#[derive(Debug, Clone)]
pub struct RowSchema {
    bindings: HashMap<ListingField, FieldBinding>,
}

impl RowSchema {
    /// Check a binding table: columns valid and unique, no field bound
    /// twice, audit fields present and writable.
    pub fn validate(table: &[FieldBinding]) -> Result<Self, RepricerError> {
        let mut bindings = HashMap::new();
        let mut columns = HashSet::new();

        for b in table {
            if column_index(b.column).is_none() {
                return Err(RepricerError::Validation(format!(
                    "schema: invalid column {:?} for {:?}",
                    b.column, b.field
                )));
            }
            if !columns.insert(b.column.to_ascii_uppercase()) {
                return Err(RepricerError::Validation(format!(
                    "schema: column {} bound twice",
                    b.column
                )));
            }
            if bindings.insert(b.field, *b).is_some() {
                return Err(RepricerError::Validation(format!(
                    "schema: field {:?} bound twice",
                    b.field
                )));
            }
        }

        for field in [ListingField::Note, ListingField::LastUpdate] {
            match bindings.get(&field) {
                Some(b) if b.writable => {}
                _ => {
                    return Err(RepricerError::Validation(format!(
                        "schema: {field:?} must be bound to a writable column"
                    )))
                }
            }
        }

        Ok(Self { bindings })
    }

    pub fn standard() -> Result<Self, RepricerError> {
        Self::validate(LISTING_SCHEMA)
    }

    pub fn column(&self, field: ListingField) -> Option<&'static str> {
        self.bindings.get(&field).map(|b| b.column)
    }

    fn readable(&self) -> impl Iterator<Item = &FieldBinding> {
        self.bindings.values().filter(|b| !b.writable)
    }
}

// ---------------------------------------------------------------------------
// Raw row
// ---------------------------------------------------------------------------

/// Non-blank, trimmed cells of one row keyed by field.
struct RawRow {
    index: u32,
    cells: HashMap<ListingField, String>,
    schema: RowSchema,
}

impl RawRow {
    fn get(&self, field: ListingField) -> Option<&str> {
        self.cells.get(&field).map(String::as_str)
    }

    fn cell_name(&self, field: ListingField) -> String {
        format!("{}{}", self.schema.column(field).unwrap_or("?"), self.index)
    }

    fn required(&self, field: ListingField) -> Result<&str, RepricerError> {
        self.get(field).ok_or_else(|| {
            RepricerError::Config(format!(
                "row {}: {:?} ({}) is empty",
                self.index,
                field,
                self.cell_name(field)
            ))
        })
    }

    fn decimal(&self, field: ListingField) -> Result<Decimal, RepricerError> {
        let raw = self.required(field)?;
        parse_decimal(raw).ok_or_else(|| {
            RepricerError::Config(format!(
                "row {}: {:?} ({}) is not a number: {raw:?}",
                self.index,
                field,
                self.cell_name(field)
            ))
        })
    }

    /// A (sheet id, sheet name, cell) triple; `None` when any part is blank.
    fn pointer(
        &self,
        id: ListingField,
        name: ListingField,
        cell: ListingField,
    ) -> Option<CellAddress> {
        Some(CellAddress::new(self.get(id)?, self.get(name)?, self.get(cell)?))
    }
}

/// Parse a number as typed or displayed in a sheet.
///
/// Either `,` or `.` may be the decimal separator, the other one only
/// groups thousands. A lone comma followed by exactly three digits
/// (`1,234`) reads both ways and is rejected.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let (sign, body) = match compact.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", compact.strip_prefix('+').unwrap_or(&compact)),
    };

    let plain = match (body.rfind(','), body.rfind('.')) {
        (None, None) => body.to_string(),
        (None, Some(_)) if body.matches('.').count() == 1 => body.to_string(),
        (None, Some(_)) => ungroup(body, '.')?,
        (Some(comma), None) if body.matches(',').count() == 1 => {
            if body.len() - comma - 1 == 3 {
                return None;
            }
            body.replacen(',', ".", 1)
        }
        (Some(_), None) => ungroup(body, ',')?,
        (Some(comma), Some(dot)) => {
            let (group, point) = if dot > comma { (',', dot) } else { ('.', comma) };
            format!("{}.{}", ungroup(&body[..point], group)?, &body[point + 1..])
        }
    };

    let text = format!("{sign}{plain}");
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// `1,234,567` → `1234567`. Every group after the first must be 3 digits.
fn ungroup(int_part: &str, sep: char) -> Option<String> {
    let digits = |g: &str| !g.is_empty() && g.bytes().all(|b| b.is_ascii_digit());
    let mut groups = int_part.split(sep);
    let first = groups.next().filter(|g| digits(g) && g.len() <= 3)?;
    let mut out = first.to_string();
    for group in groups {
        if group.len() != 3 || !digits(group) {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

// ---------------------------------------------------------------------------
// RowStore
// ---------------------------------------------------------------------------

/// Typed accessor for listing rows on the main sheet.
#[derive(Clone)]
pub struct RowStore {
    cache: Arc<ConfigCache>,
    main: SheetKey,
    schema: RowSchema,
    run_flags: Vec<String>,
}

impl RowStore {
    pub fn new(
        cache: Arc<ConfigCache>,
        main: SheetKey,
        schema: RowSchema,
        run_flags: Vec<String>,
    ) -> Self {
        Self {
            cache,
            main,
            schema,
            run_flags,
        }
    }

    pub fn main_sheet(&self) -> &SheetKey {
        &self.main
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }

    fn address(&self, field: ListingField, index: u32) -> Option<CellAddress> {
        let column = self.schema.column(field)?;
        Some(self.main.cell(format!("{column}{index}")))
    }

    /// Rows whose run-flag cell matches one of the configured flags.
    pub async fn run_indices(&self) -> Result<Vec<u32>, RepricerError> {
        let column = self.schema.column(ListingField::RunFlag).ok_or_else(|| {
            RepricerError::Validation("schema: no run-flag column".into())
        })?;
        let cells = self
            .cache
            .get_range(&self.main, &format!("{column}:{column}"))
            .await?;

        let indices: Vec<u32> = cells
            .into_iter()
            .filter(|(_, value)| self.run_flags.iter().any(|f| f == value.trim()))
            .map(|(cref, _)| cref.row)
            .collect();
        debug!(count = indices.len(), "Run indices resolved");
        Ok(indices)
    }

    async fn read_row(&self, index: u32) -> Result<RawRow, RepricerError> {
        let mut cells = HashMap::new();
        for binding in self.schema.readable() {
            let address = self.main.cell(format!("{}{}", binding.column, index));
            if let Some(value) = self.cache.get_value(&address).await? {
                cells.insert(binding.field, value.trim().to_string());
            }
        }
        Ok(RawRow {
            index,
            cells,
            schema: self.schema.clone(),
        })
    }

    async fn pointed_value(&self, address: &CellAddress) -> Result<Option<String>, RepricerError> {
        self.cache.add_sheet(&address.sheet()).await?;
        self.cache.get_value(address).await
    }

    /// Resolve one listing's configuration for this cycle.
    pub async fn load(&self, index: u32) -> Result<ListingConfig, RepricerError> {
        let row = self.read_row(index).await?;

        let name = row.required(ListingField::Name)?.to_string();

        let category_raw = row.required(ListingField::Category)?;
        let category = ListingCategory::parse(category_raw).ok_or_else(|| {
            RepricerError::Validation(format!("row {index}: unknown category {category_raw:?}"))
        })?;

        let listing_ids = split_list(row.get(ListingField::ListingIds)).ok_or_else(|| {
            RepricerError::Validation(format!("row {index}: no marketplace listing id"))
        })?;

        let compare_mode = CompareMode::parse(row.get(ListingField::CompareFlag)).ok_or_else(|| {
            RepricerError::Validation(format!(
                "row {index}: unknown compare flag {:?}",
                row.get(ListingField::CompareFlag).unwrap_or_default()
            ))
        })?;

        let compare_url = match compare_mode {
            CompareMode::Disabled => row.get(ListingField::CompareUrl).unwrap_or_default().to_string(),
            _ => row.required(ListingField::CompareUrl)?.to_string(),
        };

        let discount_min = row.decimal(ListingField::DiscountMin)?;
        let discount_max = row.decimal(ListingField::DiscountMax)?;
        if discount_min.is_sign_negative() || discount_max.is_sign_negative() {
            return Err(RepricerError::Validation(format!(
                "row {index}: discounts must not be negative"
            )));
        }
        if discount_min > discount_max {
            return Err(RepricerError::Validation(format!(
                "row {index}: discount min {discount_min} exceeds discount max {discount_max}"
            )));
        }

        let rounding_digits = row
            .decimal(ListingField::RoundingDigits)?
            .to_u32()
            .filter(|d| *d <= MAX_ROUNDING_DIGITS)
            .ok_or_else(|| {
                RepricerError::Validation(format!("row {index}: rounding digits out of range"))
            })?;

        let relax_time_secs = row
            .decimal(ListingField::RelaxTime)?
            .to_f64()
            .filter(|s| *s >= 0.0)
            .ok_or_else(|| {
                RepricerError::Validation(format!("row {index}: relax time must be >= 0"))
            })?;

        let min_price = self.min_price(&row).await?;
        let max_price = self.max_price(&row).await?;
        if let Some(max) = max_price {
            if min_price > max {
                return Err(RepricerError::Validation(format!(
                    "row {index}: min price {min_price} exceeds max price {max}"
                )));
            }
        }
        let stock = self.stock(&row).await?;
        let blacklist = self.blacklist(&row).await?;

        Ok(ListingConfig {
            index,
            name,
            category,
            listing_ids,
            compare_url,
            min_price,
            max_price,
            stock,
            blacklist,
            include_keywords: split_list(row.get(ListingField::IncludeKeywords)),
            exclude_keywords: split_list(row.get(ListingField::ExcludeKeywords)),
            discount_min,
            discount_max,
            rounding_digits,
            relax_time_secs,
            compare_mode,
        })
    }

    async fn min_price(&self, row: &RawRow) -> Result<Decimal, RepricerError> {
        let address = CellAddress::new(
            row.required(ListingField::MinSheetId)?,
            row.required(ListingField::MinSheetName)?,
            row.required(ListingField::MinCell)?,
        );
        let raw = self
            .pointed_value(&address)
            .await?
            .ok_or_else(|| RepricerError::Config(format!("min price {address} is empty")))?;
        parse_decimal(&raw).ok_or_else(|| {
            RepricerError::Config(format!("min price {address} is not a number: {raw:?}"))
        })
    }

    async fn max_price(&self, row: &RawRow) -> Result<Option<Decimal>, RepricerError> {
        let Some(address) = row.pointer(
            ListingField::MaxSheetId,
            ListingField::MaxSheetName,
            ListingField::MaxCell,
        ) else {
            return Ok(None);
        };
        match self.pointed_value(&address).await? {
            None => Ok(None),
            Some(raw) => parse_decimal(&raw).map(Some).ok_or_else(|| {
                RepricerError::Config(format!("max price {address} is not a number: {raw:?}"))
            }),
        }
    }

    async fn stock(&self, row: &RawRow) -> Result<Option<u32>, RepricerError> {
        let Some(address) = row.pointer(
            ListingField::StockSheetId,
            ListingField::StockSheetName,
            ListingField::StockCell,
        ) else {
            return Ok(None);
        };
        match self.pointed_value(&address).await? {
            None => Ok(None),
            Some(raw) => parse_decimal(&raw)
                .and_then(|d| d.trunc().to_u32())
                .map(Some)
                .ok_or_else(|| {
                    RepricerError::Config(format!("stock {address} is not a count: {raw:?}"))
                }),
        }
    }

    async fn blacklist(&self, row: &RawRow) -> Result<HashSet<String>, RepricerError> {
        let Some(pointer) = row.pointer(
            ListingField::BlacklistSheetId,
            ListingField::BlacklistSheetName,
            ListingField::BlacklistRange,
        ) else {
            return Ok(HashSet::new());
        };
        let cells = self.cache.get_range(&pointer.sheet(), &pointer.cell).await?;
        Ok(cells
            .into_iter()
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect())
    }

    /// Addresses of the audit cells of a row (note, last update).
    pub fn audit_addresses(&self, index: u32) -> Vec<CellAddress> {
        [ListingField::Note, ListingField::LastUpdate]
            .into_iter()
            .filter_map(|f| self.address(f, index))
            .collect()
    }

    /// Stage the note and timestamp for a row. Does not flush.
    pub async fn record_note(
        &self,
        index: u32,
        note: &str,
        timestamp: &str,
    ) -> Result<(), RepricerError> {
        let missing = || RepricerError::Validation("schema: audit columns missing".into());
        let note_addr = self.address(ListingField::Note, index).ok_or_else(missing)?;
        let ts_addr = self.address(ListingField::LastUpdate, index).ok_or_else(missing)?;
        self.cache.update_value(&note_addr, note).await?;
        self.cache.update_value(&ts_addr, timestamp).await?;
        Ok(())
    }

    /// The staged audit write for a row, if not flushed yet.
    pub async fn pending_update(&self, index: u32) -> Option<PendingUpdate> {
        let note = self.cache.entry(&self.address(ListingField::Note, index)?).await?;
        let ts = self.cache.entry(&self.address(ListingField::LastUpdate, index)?).await;
        if !note.dirty && !ts.as_ref().is_some_and(|t| t.dirty) {
            return None;
        }
        Some(PendingUpdate {
            index,
            note: note.value,
            last_update: ts.map(|t| t.value).unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
