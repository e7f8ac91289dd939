//! Gateway callout shim
//!
//! Turns one gateway invocation into a verdict. Whatever goes wrong upstream
//! (missing claims, unreachable rule source) the shim still returns a verdict,
//! and that verdict is DENY unless a rule explicitly allows the call.

use crate::config::CalloutConfig;
use crate::rules::{evaluate_detailed, CallerContext, Decision, RequestAttributes, Verdict};
use crate::store::RuleStore;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Header carrying the build timestamp
pub const BUILD_TIME_HEADER: &str = "x-authz-build-time";

/// Header carrying the number of invocations served by this instance
pub const INVOCATION_COUNT_HEADER: &str = "x-authz-invocation-count";

/// Build timestamp, RFC 3339
pub static BUILD_TIME: Lazy<String> = Lazy::new(|| {
    let raw = env!("CALLOUT_BUILD_EPOCH");
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| raw.to_string())
});

/// One access decision request from the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalloutInvocation {
    /// Verified claims payload: a JSON object or a string holding one
    #[serde(default)]
    pub claims: Option<Value>,
    #[serde(flatten)]
    pub request: RequestAttributes,
}

impl CalloutInvocation {
    /// Read an invocation from an arbitrary JSON body. Fields that are absent,
    /// null or not strings become empty; a body that is not an object yields an
    /// empty invocation.
    pub fn from_json(body: &Value) -> Self {
        let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or_default().to_string();

        Self {
            claims: body.get("claims").filter(|claims| !claims.is_null()).cloned(),
            request: RequestAttributes::new(field("verb"), field("method"), field("tool")),
        }
    }
}

/// Non-functional diagnostics returned next to the verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub build_time: String,
    pub invocation_count: u64,
}

impl Diagnostics {
    /// Header name/value pairs
    pub fn headers(&self) -> [(&'static str, String); 2] {
        [
            (BUILD_TIME_HEADER, self.build_time.clone()),
            (INVOCATION_COUNT_HEADER, self.invocation_count.to_string()),
        ]
    }
}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct CalloutOutcome {
    pub invocation_id: Uuid,
    pub verdict: Verdict,
    pub decision: Decision,
    pub caller: CallerContext,
    /// Present when diagnostic headers are enabled
    pub diagnostics: Option<Diagnostics>,
}

/// Adapts gateway invocations to the rule evaluator
pub struct CalloutShim {
    store: Arc<RuleStore>,
    config: CalloutConfig,
    invocations: AtomicU64,
}

impl CalloutShim {
    pub fn new(store: Arc<RuleStore>, config: CalloutConfig) -> Self {
        Self {
            store,
            config,
            invocations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CalloutConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Invocations handled so far
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Decide one invocation. Never fails: an unavailable rule table denies.
    pub async fn decide(&self, invocation: CalloutInvocation) -> CalloutOutcome {
        let invocation_count = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        let invocation_id = Uuid::new_v4();
        let caller = CallerContext::from_claims(invocation.claims.as_ref());
        let request = &invocation.request;

        let decision = match self.store.fetch().await {
            Ok(rules) => evaluate_detailed(&caller.groups, &request.verb, &request.method, &request.tool, &rules),
            Err(e) => {
                error!(
                    invocation_id = %invocation_id,
                    category = e.category(),
                    "Rule table unavailable, denying: {}",
                    e
                );
                Decision::deny_by_default()
            }
        };

        match decision.matched {
            Some(matched) => info!(
                invocation_id = %invocation_id,
                "{} groups={:?} verb={} method={} tool={} pass={} row={}",
                decision.verdict, caller.groups, request.verb, request.method, request.tool, matched.pass, matched.row
            ),
            None => info!(
                invocation_id = %invocation_id,
                "{} groups={:?} verb={} method={} tool={} pass=none",
                decision.verdict, caller.groups, request.verb, request.method, request.tool
            ),
        }

        let diagnostics = self.config.diagnostic_headers.then(|| Diagnostics {
            build_time: BUILD_TIME.clone(),
            invocation_count,
        });

        CalloutOutcome {
            invocation_id,
            verdict: decision.verdict,
            decision,
            caller,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CalloutError, Result};
    use crate::rules::MatchPass;
    use crate::store::{CacheSettings, InlineRuleSource, RuleSource};
    use async_trait::async_trait;
    use serde_json::json;

    struct DownSource;

    #[async_trait]
    impl RuleSource for DownSource {
        async fn fetch_rows(&self) -> Result<Vec<Vec<String>>> {
            Err(CalloutError::source_unavailable("connection refused"))
        }

        fn describe(&self) -> String {
            "down".to_string()
        }
    }

    fn shim_with_rows(rows: &[&[&str]]) -> CalloutShim {
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        let store = RuleStore::new(Arc::new(InlineRuleSource::new(rows)), CacheSettings::default());
        CalloutShim::new(Arc::new(store), CalloutConfig::default())
    }

    fn invocation(claims: Value, verb: &str, method: &str, tool: &str) -> CalloutInvocation {
        CalloutInvocation {
            claims: Some(claims),
            request: RequestAttributes::new(verb, method, tool),
        }
    }

    #[tokio::test]
    async fn test_allow_from_caller_group() {
        let shim = shim_with_rows(&[&["editors", "POST", "tools/call", "create_order", "ALLOW"]]);
        let outcome = shim
            .decide(invocation(json!({"az_groups": ["editors"]}), "POST", "tools/call", "create_order"))
            .await;

        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.decision.matched.map(|m| m.pass), Some(MatchPass::Specific));
        assert_eq!(outcome.caller.groups, vec!["editors"]);
    }

    #[tokio::test]
    async fn test_missing_claims_use_default_group() {
        let shim = shim_with_rows(&[&["none", "POST", "tools/list", "", "ALLOW"]]);
        let outcome = shim
            .decide(CalloutInvocation {
                claims: None,
                request: RequestAttributes::new("POST", "tools/list", ""),
            })
            .await;

        assert_eq!(outcome.verdict, Verdict::Allow);
        assert_eq!(outcome.caller.groups, vec!["none"]);
    }

    #[tokio::test]
    async fn test_unavailable_source_denies() {
        let store = RuleStore::new(Arc::new(DownSource), CacheSettings::default());
        let shim = CalloutShim::new(Arc::new(store), CalloutConfig::default());

        let outcome = shim
            .decide(invocation(json!({"az_groups": ["admins"]}), "GET", "", ""))
            .await;

        assert_eq!(outcome.verdict, Verdict::Deny);
        assert!(outcome.decision.matched.is_none());
    }

    #[tokio::test]
    async fn test_diagnostics_count_invocations() {
        let shim = shim_with_rows(&[]);
        let first = shim.decide(CalloutInvocation::default()).await;
        let second = shim.decide(CalloutInvocation::default()).await;

        assert_eq!(first.diagnostics.unwrap().invocation_count, 1);
        let diagnostics = second.diagnostics.unwrap();
        assert_eq!(diagnostics.invocation_count, 2);
        assert_eq!(diagnostics.headers()[1], (INVOCATION_COUNT_HEADER, "2".to_string()));
        assert_eq!(shim.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_diagnostics_do_not_change_verdict() {
        let rows: &[&[&str]] = &[&["any", "GET", "", "", "ALLOW"]];
        let with = shim_with_rows(rows);
        let mut config = CalloutConfig::default();
        config.diagnostic_headers = false;
        let store = RuleStore::new(
            Arc::new(InlineRuleSource::new(vec![["any", "GET", "", "", "ALLOW"].iter().map(|s| s.to_string()).collect()])),
            CacheSettings::default(),
        );
        let without = CalloutShim::new(Arc::new(store), config);

        let a = with.decide(invocation(json!({}), "GET", "", "")).await;
        let b = without.decide(invocation(json!({}), "GET", "", "")).await;
        assert_eq!(a.verdict, b.verdict);
        assert!(a.diagnostics.is_some());
        assert!(b.diagnostics.is_none());
    }

    #[test]
    fn test_invocation_from_json_tolerates_nulls_and_odd_types() {
        let invocation = CalloutInvocation::from_json(&json!({
            "claims": null,
            "verb": "POST",
            "method": "tools/list",
            "tool": null
        }));
        assert!(invocation.claims.is_none());
        assert_eq!(invocation.request, RequestAttributes::new("POST", "tools/list", ""));

        let invocation = CalloutInvocation::from_json(&json!({"verb": 7, "method": ["tools/call"], "tool": true}));
        assert_eq!(invocation.request, RequestAttributes::default());

        let invocation = CalloutInvocation::from_json(&json!(["not", "an", "object"]));
        assert!(invocation.claims.is_none());
        assert_eq!(invocation.request, RequestAttributes::default());
    }

    #[test]
    fn test_invocation_deserializes_with_missing_fields() {
        let invocation: CalloutInvocation = serde_json::from_value(json!({"verb": "GET"})).unwrap();
        assert_eq!(invocation.request.verb, "GET");
        assert_eq!(invocation.request.method, "");
        assert!(invocation.claims.is_none());
    }
}
