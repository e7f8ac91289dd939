//! Two-pass, first-match rule evaluation
//!
//! Pass one scans the table for rules bound to one of the caller's groups, pass
//! two scans it again for rules bound to the wildcard group `any`. Within a pass
//! the first applicable rule decides; pass one always wins over pass two. With
//! no applicable rule the verdict is DENY.

use super::types::{IndexedRule, Rule, RuleSet, Verdict, ANY_GROUP};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP verb whose requests only match GET rules
pub const GET_VERB: &str = "GET";

/// MCP method whose requests also match on tool name
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Which scan produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPass {
    /// The caller's own groups
    Specific,
    /// The wildcard `any` group
    Any,
}

impl fmt::Display for MatchPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPass::Specific => f.write_str("specific"),
            MatchPass::Any => f.write_str("any"),
        }
    }
}

/// Location of the rule that decided a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub pass: MatchPass,
    /// Zero-based row index in the fetched table
    pub row: usize,
}

/// Verdict plus the rule that produced it, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub matched: Option<MatchInfo>,
}

impl Decision {
    /// Decision used when no rule applies or no table is available
    pub fn deny_by_default() -> Self {
        Self {
            verdict: Verdict::Deny,
            matched: None,
        }
    }
}

/// Evaluate a request against the rule table.
pub fn evaluate(groups: &[String], verb: &str, method: &str, tool: &str, rules: &RuleSet) -> Verdict {
    evaluate_detailed(groups, verb, method, tool, rules).verdict
}

/// Evaluate a request and report which pass and row decided it.
pub fn evaluate_detailed(groups: &[String], verb: &str, method: &str, tool: &str, rules: &RuleSet) -> Decision {
    let specific = scan(rules.rules(), verb, method, tool, |group| {
        groups.iter().any(|g| g == group)
    });
    if let Some(hit) = specific {
        return decided(hit, MatchPass::Specific);
    }

    let wildcard = scan(rules.rules(), verb, method, tool, |group| group == ANY_GROUP);
    if let Some(hit) = wildcard {
        return decided(hit, MatchPass::Any);
    }

    Decision::deny_by_default()
}

fn decided(hit: &IndexedRule, pass: MatchPass) -> Decision {
    Decision {
        verdict: hit.rule.permission.into(),
        matched: Some(MatchInfo { pass, row: hit.row }),
    }
}

fn scan<'a, F>(rules: &'a [IndexedRule], verb: &str, method: &str, tool: &str, in_pass: F) -> Option<&'a IndexedRule>
where
    F: Fn(&str) -> bool,
{
    rules
        .iter()
        .filter(|indexed| in_pass(indexed.rule.group.as_str()))
        .find(|indexed| applies(&indexed.rule, verb, method, tool))
}

/// Whether a rule covers the request, ignoring the group column.
pub fn applies(rule: &Rule, verb: &str, method: &str, tool: &str) -> bool {
    if verb == GET_VERB {
        rule.http_verb == GET_VERB
    } else if method == TOOLS_CALL_METHOD {
        rule.mcp_method == TOOLS_CALL_METHOD && rule.tool_name == tool
    } else {
        rule.mcp_method == method
    }
}
