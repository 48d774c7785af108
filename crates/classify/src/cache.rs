use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use releve_core::CacheSettings;
use serde::{Deserialize, Serialize};

/// Stand-in expiry for TTLs too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    /// Per-label suggestions; short-lived.
    Suggestion,
    /// Results attached to an import, scoped by month; long-lived.
    ImportInsight,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Suggestion => write!(f, "suggestion"),
            CacheKind::ImportInsight => write!(f, "import_insight"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    /// Usually a `YYYY-MM` month.
    pub scope: Option<String>,
    pub id: String,
}

impl CacheKey {
    pub fn suggestion(id: impl Into<String>) -> Self {
        CacheKey {
            kind: CacheKind::Suggestion,
            scope: None,
            id: id.into(),
        }
    }

    pub fn insight(scope: impl Into<String>, id: impl Into<String>) -> Self {
        CacheKey {
            kind: CacheKind::ImportInsight,
            scope: Some(scope.into()),
            id: id.into(),
        }
    }
}

/// What to drop from the cache.
#[derive(Debug, Clone, Copy)]
pub enum Invalidation<'a> {
    /// Glob over entry ids, `*` matches any run of characters.
    Pattern(&'a str),
    Kind(CacheKind),
    Scope(&'a str),
}

impl Invalidation<'_> {
    fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Invalidation::Pattern(glob) => glob_match(glob, &key.id),
            Invalidation::Kind(kind) => key.kind == *kind,
            Invalidation::Scope(scope) => key.scope.as_deref() == Some(*scope),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    hits: u64,
    last_access: Instant,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    hits: u64,
    misses: u64,
    /// Bumped by every invalidation and clear.
    generation: u64,
}

/// TTL memoization of classification output. Reads update counters, so access is behind a `Mutex`.
#[derive(Debug)]
pub struct SuggestionCache<V> {
    inner: Mutex<Inner<V>>,
    suggestion_ttl: Duration,
    insight_ttl: Duration,
}

impl<V: Clone> Default for SuggestionCache<V> {
    fn default() -> Self {
        Self::new(&CacheSettings::default())
    }
}

impl<V: Clone> SuggestionCache<V> {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                generation: 0,
            }),
            suggestion_ttl: Duration::from_secs(settings.suggestion_ttl_secs),
            insight_ttl: Duration::from_secs(settings.insight_ttl_secs),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Suggestion => self.suggestion_ttl,
            CacheKind::ImportInsight => self.insight_ttl,
        }
    }

    /// Live value for `key`. An expired entry is removed and counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.hits += 1;
                entry.last_access = now;
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        inner.misses += 1;
        None
    }

    /// Stores `value`; `ttl` defaults to the kind's configured lifetime.
    pub fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let entry = self.entry(key.kind, value, ttl);
        self.lock().entries.insert(key, entry);
    }

    /// Current invalidation generation. Read it before computing a value
    /// that will be stored with [`set_if_current`](Self::set_if_current).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Stores `value` only if nothing was invalidated since `generation`.
    pub fn set_if_current(&self, key: CacheKey, value: V, ttl: Option<Duration>, generation: u64) -> bool {
        let entry = self.entry(key.kind, value, ttl);
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.entries.insert(key, entry);
        true
    }

    fn entry(&self, kind: CacheKind, value: V, ttl: Option<Duration>) -> Entry<V> {
        let ttl = ttl.unwrap_or_else(|| self.default_ttl(kind));
        let now = Instant::now();
        Entry {
            value,
            expires_at: now.checked_add(ttl).unwrap_or(now + FAR_FUTURE),
            hits: 0,
            last_access: now,
        }
    }

    /// Removes matching entries; returns how many went.
    pub fn invalidate(&self, what: Invalidation<'_>) -> usize {
        let mut inner = self.lock();
        inner.generation += 1;
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !what.matches(key));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(?what, removed, "cache invalidated");
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| now < entry.expires_at);
        before - inner.entries.len()
    }

    /// Hit count and time since last access of one entry.
    pub fn entry_usage(&self, key: &CacheKey) -> Option<(u64, Duration)> {
        self.lock()
            .entries
            .get(key)
            .map(|e| (e.hits, e.last_access.elapsed()))
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.entries.clear();
    }
}

/// `*` matches any (possibly empty) run of characters; everything else is literal.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            // Let the last star absorb one more character.
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
