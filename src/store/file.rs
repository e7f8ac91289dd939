//! File-backed rule source (YAML or JSON)

use super::source::RuleSource;
use crate::error::{CalloutError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Accepted document shapes: a bare list of rows or `{ rows: [...] }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowsDocument {
    Rows(Vec<Vec<String>>),
    Wrapped { rows: Vec<Vec<String>> },
}

/// Rule source reading a local file on every fetch
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn parse(&self, content: &str) -> Result<Vec<Vec<String>>> {
        // YAML is a superset of JSON, so one parser covers both formats
        let document: RowsDocument = serde_yaml::from_str(content).map_err(|e| {
            CalloutError::malformed_source(format!("Rule file {} is not a list of rows: {}", self.path.display(), e))
        })?;

        Ok(match document {
            RowsDocument::Rows(rows) => rows,
            RowsDocument::Wrapped { rows } => rows,
        })
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CalloutError::source_unavailable(format!("Failed to read rule file {}: {}", self.path.display(), e))
        })?;

        let rows = self.parse(&content)?;
        debug!("Read {} rows from {}", rows.len(), self.path.display());
        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_yaml_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- [editors, POST, tools/call, create_order, ALLOW]\n- [any, GET, \"\", \"\", ALLOW]"
        )
        .unwrap();

        let source = FileRuleSource::new(file.path().to_path_buf());
        let rows = source.fetch_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][3], "create_order");
        assert_eq!(rows[1][2], "");
    }

    #[tokio::test]
    async fn test_wrapped_json_rows() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rows": [["editors", "POST", "tools/list", "", "ALLOW"]]}}"#).unwrap();

        let source = FileRuleSource::new(file.path().to_path_buf());
        let rows = source.fetch_rows().await.unwrap();
        assert_eq!(rows, vec![vec!["editors", "POST", "tools/list", "", "ALLOW"]]);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let source = FileRuleSource::new(PathBuf::from("/definitely/not/here/rules.yaml"));
        let err = source.fetch_rows().await.unwrap_err();
        assert_eq!(err.category(), "source_unavailable");
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "rules: 7").unwrap();

        let source = FileRuleSource::new(file.path().to_path_buf());
        let err = source.fetch_rows().await.unwrap_err();
        assert_eq!(err.category(), "malformed_source");
    }
}
