//! Google Sheets rule source
//!
//! Reads the rule table with the Sheets v4 `values.get` call. The sheet is
//! read-only from here; editing rules happens in the spreadsheet itself.

use super::source::RuleSource;
use crate::config::SheetsSourceConfig;
use crate::error::{CalloutError, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Response body of `spreadsheets.values.get`
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    range: Option<String>,
    /// Absent when the range holds no data
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// How requests to the Sheets API authenticate
#[derive(Clone)]
enum SheetsCredentials {
    ApiKey(Secret<String>),
    AccessToken(Secret<String>),
    Anonymous,
}

/// Rule source backed by a spreadsheet range
pub struct SheetsRuleSource {
    http_client: reqwest::Client,
    values_url: Url,
    spreadsheet_id: String,
    range: String,
    credentials: SheetsCredentials,
}

impl SheetsRuleSource {
    /// Create a new Sheets source; fails on an unusable API base URL
    pub fn new(config: &SheetsSourceConfig, http_client: reqwest::Client) -> Result<Self> {
        let values_url = Self::values_url(&config.api_base, &config.spreadsheet_id, &config.range)?;

        // An access token takes precedence: it also works for private sheets
        let credentials = match (&config.access_token, &config.api_key) {
            (Some(token), _) => SheetsCredentials::AccessToken(token.clone()),
            (None, Some(key)) => SheetsCredentials::ApiKey(key.clone()),
            (None, None) => SheetsCredentials::Anonymous,
        };

        Ok(Self {
            http_client,
            values_url,
            spreadsheet_id: config.spreadsheet_id.clone(),
            range: config.range.clone(),
            credentials,
        })
    }

    fn values_url(api_base: &str, spreadsheet_id: &str, range: &str) -> Result<Url> {
        let raw = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            api_base.trim_end_matches('/'),
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(range)
        );
        Url::parse(&raw).map_err(|e| CalloutError::config(format!("Invalid Sheets API URL '{}': {}", raw, e)))
    }

    fn cell_to_string(cell: Value) -> String {
        match cell {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl RuleSource for SheetsRuleSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>> {
        let mut url = self.values_url.clone();
        if let SheetsCredentials::ApiKey(key) = &self.credentials {
            url.query_pairs_mut().append_pair("key", key.expose_secret());
        }

        debug!("Fetching rule table from spreadsheet {} range {}", self.spreadsheet_id, self.range);

        let mut request = self.http_client.get(url);
        if let SheetsCredentials::AccessToken(token) = &self.credentials {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            CalloutError::source_unavailable(format!(
                "Failed to reach Sheets API for {}: {}",
                self.spreadsheet_id,
                e.without_url()
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalloutError::source_unavailable(format!(
                "Sheets API returned {} for spreadsheet {}",
                status, self.spreadsheet_id
            )));
        }

        let body: ValueRange = response.json().await.map_err(|e| {
            CalloutError::malformed_source(format!(
                "Sheets API response for {} could not be decoded: {}",
                self.spreadsheet_id,
                e.without_url()
            ))
        })?;

        debug!(
            "Sheets API returned {} rows for range {}",
            body.values.len(),
            body.range.as_deref().unwrap_or(&self.range)
        );

        let mut rows: Vec<Vec<String>> = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(Self::cell_to_string).collect())
            .collect();

        if rows.first().map(|row| is_header_row(row)).unwrap_or(false) {
            debug!("Skipping header row of spreadsheet {}", self.spreadsheet_id);
            rows.remove(0);
        }

        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("sheets:{} ({})", self.spreadsheet_id, self.range)
    }
}

/// The sheet's column titles: first cell `group`, any case
fn is_header_row(row: &[String]) -> bool {
    row.first()
        .map(|cell| cell.trim().eq_ignore_ascii_case("group"))
        .unwrap_or(false)
}
