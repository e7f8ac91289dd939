//! Read-only rule sources
//!
//! A rule source hands back the raw table as ordered rows of strings. It knows
//! nothing about rule semantics, so the spreadsheet can be swapped for a file or
//! a database without touching evaluation.

use crate::config::RuleSourceConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::file::FileRuleSource;
use super::sheets::SheetsRuleSource;

/// Narrow read-only interface over the tabular rule store
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Fetch every row, in table order
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>>;

    /// Description for logs; must not contain credentials
    fn describe(&self) -> String;
}

/// Rows held in memory, from configuration or tests
#[derive(Debug, Clone, Default)]
pub struct InlineRuleSource {
    rows: Vec<Vec<String>>,
}

impl InlineRuleSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl RuleSource for InlineRuleSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.rows.clone())
    }

    fn describe(&self) -> String {
        format!("inline ({} rows)", self.rows.len())
    }
}

/// Build the configured rule source
pub fn build_source(config: &RuleSourceConfig, http_client: reqwest::Client) -> Result<Arc<dyn RuleSource>> {
    let source: Arc<dyn RuleSource> = match config {
        RuleSourceConfig::Sheets(sheets) => Arc::new(SheetsRuleSource::new(sheets, http_client)?),
        RuleSourceConfig::File { path } => Arc::new(FileRuleSource::new(path.clone())),
        RuleSourceConfig::Inline { rows } => Arc::new(InlineRuleSource::new(rows.clone())),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inline_source_returns_rows_in_order() {
        let rows = vec![
            vec!["editors".to_string(), "POST".to_string()],
            vec!["any".to_string(), "GET".to_string()],
        ];
        let source = InlineRuleSource::new(rows.clone());
        assert_eq!(source.fetch_rows().await.unwrap(), rows);
        assert_eq!(source.describe(), "inline (2 rows)");
    }

    #[test]
    fn test_build_source_rejects_bad_sheets_base() {
        let config = RuleSourceConfig::Sheets(crate::config::SheetsSourceConfig {
            spreadsheet_id: "abc".to_string(),
            api_base: "not a url".to_string(),
            ..Default::default()
        });
        assert!(build_source(&config, reqwest::Client::new()).is_err());
    }
}
