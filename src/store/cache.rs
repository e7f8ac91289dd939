//! Read-through cache over a rule source
//!
//! The cached table is an immutable `Arc<RuleSet>` behind an `ArcSwapOption`,
//! so readers never block and a refresh is a single pointer swap. Refreshes
//! are serialized by an async mutex: when many callers miss at once, one of them
//! fetches and the rest pick up its result.

use super::source::RuleSource;
use crate::config::StalePolicy;
use crate::error::{CalloutError, Result};
use crate::rules::RuleSet;
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cache behavior for the rule store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long a fetched table is served without asking the source again
    pub ttl: Duration,
    /// Upper bound on a single source fetch
    pub fetch_timeout: Duration,
    /// Behavior when a refresh fails with a table already cached
    pub stale_policy: StalePolicy,
    /// Oldest table age that may still be served under `ServeStale`
    pub max_stale: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(180),
            fetch_timeout: Duration::from_secs(10),
            stale_policy: StalePolicy::ServeStale,
            max_stale: None,
        }
    }
}

/// A cached table plus its timing
#[derive(Debug)]
struct CachedRules {
    rules: Arc<RuleSet>,
    /// When the source last delivered this table
    loaded_at: Instant,
    /// When the source was last asked, successfully or not
    checked_at: Instant,
}

/// A refresh attempt that failed and left nothing servable
#[derive(Debug)]
struct FailedRefresh {
    error: CalloutError,
    at: Instant,
}

impl CachedRules {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.checked_at.elapsed() < ttl
    }

    fn is_stale(&self) -> bool {
        self.checked_at > self.loaded_at
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub source: String,
    pub loaded: bool,
    pub rules: usize,
    pub malformed_rows: usize,
    pub shadowed_rows: usize,
    /// Seconds since the source last delivered the table
    pub age_secs: Option<u64>,
    /// Whether the table is being served past a failed refresh
    pub stale: bool,
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub fetched_at: Option<String>,
}

/// Rule store: source access, TTL caching and the failure policy
pub struct RuleStore {
    source: Arc<dyn RuleSource>,
    settings: CacheSettings,
    current: ArcSwapOption<CachedRules>,
    refresh_lock: Mutex<()>,
    last_error: ArcSwapOption<String>,
    last_failure: ArcSwapOption<FailedRefresh>,
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl RuleStore {
    pub fn new(source: Arc<dyn RuleSource>, settings: CacheSettings) -> Self {
        Self {
            source,
            settings,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
            last_error: ArcSwapOption::empty(),
            last_failure: ArcSwapOption::empty(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Current rule table, refreshing it from the source when expired.
    ///
    /// Fails with the source error when no table can be served under the
    /// configured stale policy.
    pub async fn fetch(&self) -> Result<Arc<RuleSet>> {
        if let Some(rules) = self.fresh_rules() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(rules);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let queued_at = Instant::now();
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(rules) = self.fresh_rules() {
            debug!("Rule table refreshed by a concurrent caller");
            return Ok(rules);
        }

        // Or failed while we waited; share its outcome instead of asking again
        if let Some(failure) = self.last_failure.load_full().filter(|f| f.at >= queued_at) {
            debug!("Rule refresh failed for a concurrent caller, not retrying");
            return Err(failure.error.clone());
        }

        self.refresh_locked().await
    }

    /// Refresh now, regardless of freshness
    pub async fn force_refresh(&self) -> Result<Arc<RuleSet>> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    fn fresh_rules(&self) -> Option<Arc<RuleSet>> {
        self.current
            .load_full()
            .filter(|c| c.is_fresh(self.settings.ttl))
            .map(|c| Arc::clone(&c.rules))
    }

    async fn refresh_locked(&self) -> Result<Arc<RuleSet>> {
        match self.load_from_source().await {
            Ok(rules) => {
                let now = Instant::now();
                self.current.store(Some(Arc::new(CachedRules {
                    rules: Arc::clone(&rules),
                    loaded_at: now,
                    checked_at: now,
                })));
                self.last_error.store(None);
                self.last_failure.store(None);
                self.refreshes.fetch_add(1, Ordering::Relaxed);

                info!(
                    "Loaded {} rules from {} ({} malformed rows, {} shadowed rows)",
                    rules.len(),
                    self.source.describe(),
                    rules.malformed,
                    rules.shadowed
                );
                Ok(rules)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.last_error.store(Some(Arc::new(e.to_string())));
                let outcome = self.fall_back(e);
                if let Err(error) = &outcome {
                    self.last_failure.store(Some(Arc::new(FailedRefresh {
                        error: error.clone(),
                        at: Instant::now(),
                    })));
                }
                outcome
            }
        }
    }

    async fn load_from_source(&self) -> Result<Arc<RuleSet>> {
        let rows = tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch_rows())
            .await
            .map_err(|_| {
                CalloutError::timeout(format!(
                    "Fetching rules from {} took longer than {:?}",
                    self.source.describe(),
                    self.settings.fetch_timeout
                ))
            })??;

        Ok(Arc::new(RuleSet::from_rows(rows)))
    }

    fn fall_back(&self, error: CalloutError) -> Result<Arc<RuleSet>> {
        if self.settings.stale_policy == StalePolicy::FailClosed {
            warn!("Rule refresh failed ({}), failing closed", error);
            return Err(error);
        }

        let Some(previous) = self.current.load_full() else {
            warn!("Rule refresh failed ({}) and no table is cached", error);
            return Err(error);
        };

        let age = previous.loaded_at.elapsed();
        if let Some(max_stale) = self.settings.max_stale {
            if age > max_stale {
                warn!(
                    "Rule refresh failed ({}); cached table is {:?} old, past the {:?} stale limit",
                    error, age, max_stale
                );
                return Err(error);
            }
        }

        warn!(
            "Rule refresh failed ({}); serving cached table loaded {:?} ago",
            error, age
        );

        // Keep serving the old table until the next TTL boundary instead of
        // hitting a failing source on every request
        self.current.store(Some(Arc::new(CachedRules {
            rules: Arc::clone(&previous.rules),
            loaded_at: previous.loaded_at,
            checked_at: Instant::now(),
        })));

        Ok(Arc::clone(&previous.rules))
    }

    /// Counters and table summary
    pub fn stats(&self) -> CacheStats {
        let cached = self.current.load_full();
        let last_error = self.last_error.load_full().map(|e| e.as_ref().clone());

        let mut stats = CacheStats {
            source: self.source.describe(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_error,
            ..CacheStats::default()
        };

        if let Some(cached) = cached {
            stats.loaded = true;
            stats.rules = cached.rules.len();
            stats.malformed_rows = cached.rules.malformed;
            stats.shadowed_rows = cached.rules.shadowed;
            stats.age_secs = Some(cached.loaded_at.elapsed().as_secs());
            stats.stale = cached.is_stale();
            stats.fetched_at = Some(cached.rules.fetched_at.to_rfc3339());
        }

        stats
    }
}
