//! Rule store against a mocked Sheets API

use mcp_authz_callout::config::{SheetsSourceConfig, StalePolicy};
use mcp_authz_callout::rules::Verdict;
use mcp_authz_callout::store::{CacheSettings, RuleSource, RuleStore, SheetsRuleSource};
use mcp_authz_callout::{evaluate, CalloutError};
use secrecy::Secret;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VALUES_PATH: &str = "/v4/spreadsheets/sheet-1/values/Rules";

fn sheets_config(server: &MockServer) -> SheetsSourceConfig {
    SheetsSourceConfig {
        spreadsheet_id: "sheet-1".to_string(),
        range: "Rules".to_string(),
        api_base: server.uri(),
        api_key: None,
        access_token: None,
    }
}

fn rule_table() -> serde_json::Value {
    json!({
        "range": "Rules!A1:E3",
        "majorDimension": "ROWS",
        "values": [
            ["group", "http_verb", "mcp_method", "tool_name", "permission"],
            ["editors", "POST", "tools/call", "create_order", "ALLOW"],
            ["any", "GET", "", "", "ALLOW"]
        ]
    })
}

#[tokio::test]
async fn test_api_key_is_sent_as_query_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .and(query_param("key", "k-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_table()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = sheets_config(&server);
    config.api_key = Some(Secret::new("k-1".to_string()));
    let source = SheetsRuleSource::new(&config, reqwest::Client::new()).unwrap();

    let rows = source.fetch_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec!["editors", "POST", "tools/call", "create_order", "ALLOW"]);
}

#[tokio::test]
async fn test_sheet_without_header_keeps_first_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                ["editors", "POST", "tools/call", "create_order", "ALLOW"],
                ["group", "GET", "", "", "ALLOW"]
            ]
        })))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let rows = source.fetch_rows().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "editors");
    assert_eq!(rows[1][0], "group");
}

#[tokio::test]
async fn test_access_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .and(header("authorization", "Bearer t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_table()))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = sheets_config(&server);
    config.access_token = Some(Secret::new("t-1".to_string()));
    config.api_key = Some(Secret::new("ignored".to_string()));
    let source = SheetsRuleSource::new(&config, reqwest::Client::new()).unwrap();

    assert_eq!(source.fetch_rows().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_is_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let err = source.fetch_rows().await.unwrap_err();
    assert!(matches!(err, CalloutError::SourceUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>quota exceeded</html>"))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let err = source.fetch_rows().await.unwrap_err();
    assert_eq!(err.category(), "malformed_source");
}

#[tokio::test]
async fn test_missing_values_is_empty_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"range": "Rules!A1:E1"})))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    assert!(source.fetch_rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_hits_sheet_once_per_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_table()))
        .expect(1)
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let store = Arc::new(RuleStore::new(Arc::new(source), CacheSettings::default()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move { store.fetch().await }));
    }
    for handle in handles {
        let rules = handle.await.unwrap().unwrap();
        assert_eq!(rules.len(), 2);
    }

    let rules = store.fetch().await.unwrap();
    let editors = vec!["editors".to_string()];
    assert_eq!(evaluate(&editors, "POST", "tools/call", "create_order", &rules), Verdict::Allow);
    assert_eq!(store.stats().refreshes, 1);
}

#[tokio::test]
async fn test_store_serves_stale_table_when_sheet_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_table()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let settings = CacheSettings {
        ttl: Duration::from_millis(20),
        ..CacheSettings::default()
    };
    let store = RuleStore::new(Arc::new(source), settings);

    assert_eq!(store.fetch().await.unwrap().len(), 2);
    tokio::time::sleep(Duration::from_millis(40)).await;

    let rules = store.fetch().await.unwrap();
    assert_eq!(rules.len(), 2);
    let stats = store.stats();
    assert!(stats.stale);
    assert_eq!(stats.failures, 1);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn test_store_fails_closed_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(rule_table()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VALUES_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = SheetsRuleSource::new(&sheets_config(&server), reqwest::Client::new()).unwrap();
    let settings = CacheSettings {
        ttl: Duration::from_millis(20),
        stale_policy: StalePolicy::FailClosed,
        ..CacheSettings::default()
    };
    let store = RuleStore::new(Arc::new(source), settings);

    store.fetch().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let err = store.fetch().await.unwrap_err();
    assert_eq!(err.category(), "source_unavailable");
}
