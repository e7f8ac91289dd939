//! Rule table data model
//!
//! A rule table is an ordered list of rows `group, httpVerb, mcpMethod, toolName,
//! permission`. Row order matters: the first applicable row wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Number of fields a row needs before it can become a rule
pub const RULE_FIELD_COUNT: usize = 5;

/// Group every caller implicitly belongs to during the second pass
pub const ANY_GROUP: &str = "any";

/// Group assigned when the caller's group claim is absent or malformed
pub const DEFAULT_GROUP: &str = "none";

/// Claim carrying the caller's group memberships
pub const GROUPS_CLAIM: &str = "az_groups";

/// Permission column of a rule row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Allow,
    Deny,
}

impl Permission {
    /// Only a case-insensitive `ALLOW` grants access; anything else denies.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("ALLOW") {
            Permission::Allow
        } else {
            Permission::Deny
        }
    }
}

/// Access decision returned to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Allow,
    #[default]
    Deny,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Deny => "DENY",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Permission> for Verdict {
    fn from(permission: Permission) -> Self {
        match permission {
            Permission::Allow => Verdict::Allow,
            Permission::Deny => Verdict::Deny,
        }
    }
}

/// One row of the access table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Group the rule binds to (`any` for the wildcard pass)
    pub group: String,
    /// HTTP verb, only consulted for GET requests
    pub http_verb: String,
    /// MCP method, e.g. `tools/list` or `tools/call`
    pub mcp_method: String,
    /// Tool name, only consulted for `tools/call`
    pub tool_name: String,
    /// Permission granted when the rule applies
    pub permission: Permission,
}

impl Rule {
    /// Build a rule from a raw row. Rows with fewer than five fields are inert
    /// and yield `None`; extra trailing fields are ignored.
    pub fn from_row(row: &[String]) -> Option<Self> {
        if row.len() < RULE_FIELD_COUNT {
            return None;
        }

        Some(Self {
            group: row[0].trim().to_string(),
            http_verb: row[1].trim().to_string(),
            mcp_method: row[2].trim().to_string(),
            tool_name: row[3].trim().to_string(),
            permission: Permission::parse(&row[4]),
        })
    }

    fn match_key(&self) -> (&str, &str, &str, &str) {
        (&self.group, &self.http_verb, &self.mcp_method, &self.tool_name)
    }
}

/// A rule together with its position in the source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRule {
    /// Zero-based row index in the fetched table
    pub row: usize,
    pub rule: Rule,
}

/// Immutable, ordered rule table as fetched from the rule source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<IndexedRule>,
    /// Rows skipped because they had fewer than five fields
    pub malformed: usize,
    /// Later rows whose key repeats an earlier row with the opposite permission
    pub shadowed: usize,
    /// When the rows were fetched
    pub fetched_at: DateTime<Utc>,
}

impl RuleSet {
    /// Build a rule set from raw rows, preserving order.
    ///
    /// Every row is data; sources that carry a header strip it first. Rows too
    /// short to form a rule are counted and dropped. A row repeating the key of
    /// an earlier row with a different permission is kept but can never win, and
    /// is reported so the table owner can fix the ordering.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let mut rules = Vec::with_capacity(rows.len());
        let mut malformed = 0;
        let mut shadowed = 0;
        let mut first_seen: HashMap<(String, String, String, String), (usize, Permission)> = HashMap::new();

        for (row_index, row) in rows.iter().enumerate() {
            let Some(rule) = Rule::from_row(row) else {
                debug!("Ignoring malformed rule row {} ({} fields)", row_index, row.len());
                malformed += 1;
                continue;
            };

            let (group, verb, method, tool) = rule.match_key();
            let key = (group.to_string(), verb.to_string(), method.to_string(), tool.to_string());
            match first_seen.get(&key) {
                Some((earlier_row, earlier_permission)) if *earlier_permission != rule.permission => {
                    warn!(
                        "Rule row {} ({:?}) is shadowed by row {} ({:?}) for group '{}'; the earlier row wins",
                        row_index, rule.permission, earlier_row, earlier_permission, rule.group
                    );
                    shadowed += 1;
                }
                Some(_) => {}
                None => {
                    first_seen.insert(key, (row_index, rule.permission));
                }
            }

            rules.push(IndexedRule { row: row_index, rule });
        }

        Self {
            rules,
            malformed,
            shadowed,
            fetched_at: Utc::now(),
        }
    }

    /// Empty table; every evaluation against it denies
    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    /// Rules in table order
    pub fn rules(&self) -> &[IndexedRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Per-request caller identity, derived from the verified claims payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub groups: Vec<String>,
}

impl Default for CallerContext {
    fn default() -> Self {
        Self {
            groups: vec![DEFAULT_GROUP.to_string()],
        }
    }
}

impl CallerContext {
    /// Derive the caller's groups from a claims payload.
    ///
    /// The payload may be a JSON object or a string holding one. The `az_groups`
    /// claim must be an array of strings; when the payload or the claim is
    /// missing or has any other shape the caller falls back to group `none`.
    pub fn from_claims(claims: Option<&Value>) -> Self {
        match claims {
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(parsed) => Self::from_claims_object(&parsed),
                Err(e) => {
                    debug!("Claims payload is not valid JSON ({}), using default group", e);
                    Self::default()
                }
            },
            Some(value) => Self::from_claims_object(value),
            None => Self::default(),
        }
    }

    fn from_claims_object(claims: &Value) -> Self {
        let Some(groups) = claims.get(GROUPS_CLAIM) else {
            return Self::default();
        };

        let Some(items) = groups.as_array() else {
            debug!("Claim '{}' is not an array, using default group", GROUPS_CLAIM);
            return Self::default();
        };

        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(group) => parsed.push(group.to_string()),
                None => {
                    debug!("Claim '{}' holds a non-string entry, using default group", GROUPS_CLAIM);
                    return Self::default();
                }
            }
        }

        Self { groups: parsed }
    }
}

/// Request attributes the gateway extracts from the inbound JSON-RPC call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttributes {
    /// HTTP verb of the inbound request
    #[serde(default)]
    pub verb: String,
    /// JSON-RPC method, e.g. `tools/call`
    #[serde(default)]
    pub method: String,
    /// Tool name, meaningful only for `tools/call`
    #[serde(default)]
    pub tool: String,
}

impl RequestAttributes {
    pub fn new<V, M, T>(verb: V, method: M, tool: T) -> Self
    where
        V: Into<String>,
        M: Into<String>,
        T: Into<String>,
    {
        Self {
            verb: verb.into(),
            method: method.into(),
            tool: tool.into(),
        }
    }
}
