//! Rule store: read-only rule sources and the TTL cache in front of them

pub mod cache;
pub mod file;
pub mod sheets;
pub mod source;

pub use cache::{CacheSettings, CacheStats, RuleStore};
pub use file::FileRuleSource;
pub use sheets::SheetsRuleSource;
pub use source::{build_source, InlineRuleSource, RuleSource};
