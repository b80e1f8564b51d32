//! A1 notation: column letters, single cells and rectangular ranges.
//!
//! Rows and columns are 1-based, as in the spreadsheet UI.

use std::fmt;

/// Convert a 1-based column index to letters (`1 -> A`, `27 -> AA`).
pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Convert column letters to a 1-based index. Case-insensitive.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        c.is_ascii_uppercase()
            .then(|| acc * 26 + (c as u32 - 'A' as u32 + 1))
    })
}

/// Drop an optional `Sheet!` prefix and absolute-reference `$` markers.
fn strip(raw: &str) -> String {
    let body = raw.rsplit('!').next().unwrap_or(raw);
    body.trim().replace('$', "")
}

/// Split `AB12` into (`AB`, `12`). Either part may be empty.
fn split_ref(s: &str) -> (&str, &str) {
    let pos = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(pos)
}

/// A single cell reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(col: u32, row: u32) -> Self {
        Self { row, col }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let s = strip(raw);
        let (letters, digits) = split_ref(&s);
        let col = column_index(letters)?;
        let row: u32 = digits.parse().ok()?;
        (row > 0).then_some(Self { row, col })
    }

    pub fn to_a1(&self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Rectangular range. Row bounds may be open (`A:A`, `A2:A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub start_col: u32,
    pub end_col: u32,
    pub start_row: Option<u32>,
    pub end_row: Option<u32>,
}

impl A1Range {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = strip(raw);
        let (start, end) = match s.split_once(':') {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => (s.clone(), s.clone()),
        };

        let (sl, sd) = split_ref(&start);
        let (el, ed) = split_ref(&end);
        let start_col = column_index(sl)?;
        let end_col = column_index(el)?;
        let start_row = if sd.is_empty() { None } else { Some(sd.parse().ok()?) };
        let end_row = if ed.is_empty() { None } else { Some(ed.parse().ok()?) };

        Some(Self {
            start_col: start_col.min(end_col),
            end_col: start_col.max(end_col),
            start_row,
            end_row,
        })
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        cell.col >= self.start_col
            && cell.col <= self.end_col
            && self.start_row.map_or(true, |r| cell.row >= r)
            && self.end_row.map_or(true, |r| cell.row <= r)
    }
}
