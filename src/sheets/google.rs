//! Google Sheets v4 REST implementation of [`SheetStore`].
//!
//! Reads use `GET values/{range}` with unformatted values, so numbers
//! arrive as JSON numbers whatever the sheet's locale or number format.
//! Writes go through `values:batchUpdate`, one request per sheet carrying
//! every cell.
//!
//! API docs: https://developers.google.com/sheets/api/reference/rest
//! Auth: `Authorization: Bearer {token}` (OAuth access token).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{RangeUpdate, SheetStore};
use crate::types::RepricerError;

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";
const SERVICE: &str = "sheets";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'static str,
    data: Vec<BatchRange<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchRange<'a> {
    range: String,
    values: [[&'a str; 1]; 1],
}

/// `Sheet 1` → `'Sheet 1'`; embedded quotes are doubled.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn a1_target(sheet_name: &str, range: Option<&str>) -> String {
    match range {
        Some(r) => format!("{}!{}", quote_sheet(sheet_name), r),
        None => quote_sheet(sheet_name),
    }
}

/// Text cells come back as strings, numeric cells as JSON numbers; both
/// end up as plain text.
fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn read_url(base_url: &str, sheet_id: &str, target: &str) -> String {
    format!(
        "{}/spreadsheets/{}/values/{}?valueRenderOption=UNFORMATTED_VALUE&majorDimension=ROWS",
        base_url,
        urlencoding::encode(sheet_id),
        urlencoding::encode(target),
    )
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GoogleSheetsStore {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl GoogleSheetsStore {
    pub fn new(
        base_url: impl Into<String>,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, RepricerError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("repricer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepricerError::Config(format!("failed to build sheets client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, RepricerError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(RepricerError::network(
            SERVICE,
            format!("{what} failed with {status}: {body}"),
        ))
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsStore {
    async fn read_range(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        range: Option<&str>,
    ) -> Result<Vec<Vec<String>>, RepricerError> {
        let target = a1_target(sheet_name, range);
        let url = read_url(&self.base_url, sheet_id, &target);
        debug!(sheet_id, sheet_name, range = %target, "Reading sheet range");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| RepricerError::network(SERVICE, format!("read {target}: {e}")))?;
        let resp = Self::check(resp, "read").await?;

        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| RepricerError::network(SERVICE, format!("bad read response: {e}")))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn write_batch(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        updates: &[RangeUpdate],
    ) -> Result<(), RepricerError> {
        if updates.is_empty() {
            return Ok(());
        }
        let request = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data: updates
                .iter()
                .map(|u| BatchRange {
                    range: a1_target(sheet_name, Some(&u.range)),
                    values: [[u.value.as_str()]],
                })
                .collect(),
        };
        let url = format!(
            "{}/spreadsheets/{}/values:batchUpdate",
            self.base_url,
            urlencoding::encode(sheet_id),
        );
        debug!(sheet_id, sheet_name, cells = updates.len(), "Writing sheet batch");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| RepricerError::network(SERVICE, format!("batch write: {e}")))?;
        Self::check(resp, "batch write").await?;
        Ok(())
    }
}
