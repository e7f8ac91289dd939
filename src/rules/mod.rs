//! Access rules: the rule table model and the evaluator that walks it.

pub mod evaluator;
pub mod types;

pub use evaluator::{applies, evaluate, evaluate_detailed, Decision, MatchInfo, MatchPass};
pub use types::{
    CallerContext, IndexedRule, Permission, RequestAttributes, Rule, RuleSet, Verdict, ANY_GROUP,
    DEFAULT_GROUP, GROUPS_CLAIM,
};
