//! Decision cache: bounded LRU of verdicts with a TTL and rule generation.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CacheCorruption;
use crate::model::{Domain, ShellDialect, ValidationResult, VerdictSource};

/// Identity of one validation request under one policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub raw: String,
    pub shell: ShellDialect,
    pub hint: Option<Domain>,
    pub policy: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ValidationResult,
    created_at: Instant,
    ttl: Duration,
    generation: u64,
}

/// Thread-safe verdict cache. A zero TTL or capacity disables it.
#[derive(Debug)]
pub struct DecisionCache {
    inner: Option<Mutex<LruCache<CacheKey, CacheEntry>>>,
    ttl: Duration,
}

impl DecisionCache {
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let inner = NonZeroUsize::new(capacity)
            .filter(|_| !ttl.is_zero())
            .map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner, ttl }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            inner: None,
            ttl: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Cached verdict for `key` built against rule `generation`.
    ///
    /// Expired, stale and corrupt entries are evicted and reported as misses.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<ValidationResult> {
        let mut cache = self.inner.as_ref()?.lock();
        let entry = cache.get(key)?;

        let miss = if entry.generation != generation {
            Some("stale rule generation")
        } else if entry.created_at.elapsed() >= entry.ttl {
            Some("expired")
        } else {
            None
        };
        if let Some(reason) = miss {
            debug!(reason, "evicting cached verdict");
            cache.pop(key);
            return None;
        }

        if let Err(corruption) = check_spans(key, &entry.result) {
            warn!(error = %corruption, "evicting corrupt cached verdict");
            cache.pop(key);
            return None;
        }

        let mut result = entry.result.clone();
        result.source = VerdictSource::Cache;
        Some(result)
    }

    pub fn insert(&self, key: CacheKey, result: &ValidationResult, generation: u64) {
        let Some(inner) = &self.inner else { return };
        inner.lock().put(
            key,
            CacheEntry {
                result: result.clone(),
                created_at: Instant::now(),
                ttl: self.ttl,
                generation,
            },
        );
    }

    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.lock().clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every match span must lie inside the raw command.
fn check_spans(key: &CacheKey, result: &ValidationResult) -> Result<(), CacheCorruption> {
    for m in &result.matched {
        if !m.span.fits(key.raw.len()) || key.raw.get(m.span.start..m.span.end).is_none() {
            return Err(CacheCorruption {
                key: key.raw.clone(),
                reason: format!(
                    "span {}..{} of `{}` outside {} byte command",
                    m.span.start,
                    m.span.end,
                    m.pattern_id,
                    key.raw.len()
                ),
            });
        }
    }
    Ok(())
}
