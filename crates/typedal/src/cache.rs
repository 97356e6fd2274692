//! Result caching.
//!
//! A cacheable query is keyed by a SHA-256 digest of everything that shapes
//! its result. Stored entries carry `(table, id)` dependencies so that writes
//! through the query builder can drop the entries they make stale.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use typedal_core::SqlValue;

use crate::error::{Result, TypedalError};
use crate::rows::FlatRow;

/// A `(table, id)` pair an entry depends on.
pub type Dependency = (String, i64);

/// A stored, serialised result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// JSON payload.
    pub payload: String,
    /// When the entry was stored.
    pub cached_at: DateTime<Utc>,
    /// When the entry stops being served; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Returns whether the entry has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Storage backend for cached results.
///
/// Implement this to keep results somewhere other than process memory.
pub trait CacheStore: Send + Sync {
    /// Returns the live entry stored under `key`.
    fn load(&self, key: &str) -> Option<CacheEntry>;

    /// Stores an entry, replacing any previous one under the same key.
    fn save(&self, key: &str, dependencies: &[Dependency], entry: CacheEntry);

    /// Drops every entry depending on one of `ids` in `table`.
    ///
    /// Returns the number of entries removed.
    fn invalidate(&self, table: &str, ids: &[i64]) -> usize;

    /// Drops every entry.
    fn clear(&self);

    /// Drops expired entries and returns how many were removed.
    fn clear_expired(&self) -> usize;
}

/// In-process cache store backed by `DashMap`.
///
/// Expired entries are evicted lazily when loaded.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    dependents: Arc<DashMap<Dependency, HashSet<String>>>,
}

impl MemoryCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn load(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.value().is_expired(Utc::now()) {
                return Some(entry.value().clone());
            }
            // drop the read guard before removing
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    fn save(&self, key: &str, dependencies: &[Dependency], entry: CacheEntry) {
        self.entries.insert(String::from(key), entry);
        for dependency in dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(String::from(key));
        }
    }

    fn invalidate(&self, table: &str, ids: &[i64]) -> usize {
        let mut removed = 0;
        for &id in ids {
            let Some((_, keys)) = self.dependents.remove(&(String::from(table), id)) else {
                continue;
            };
            for key in keys {
                if self.entries.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    fn clear(&self) {
        self.entries.clear();
        self.dependents.clear();
    }

    fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}

/// Whether a result came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Just computed and stored.
    Fresh,
    /// Served from the cache.
    Cached,
}

/// Cache state of a query, carried in its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Whether the result may be cached.
    pub enabled: bool,
    /// Columns the entry depends on; empty means every selected `id`.
    pub depends_on: Vec<String>,
    /// The computed key.
    pub key: Option<String>,
    /// Where the result came from.
    pub status: Option<CacheStatus>,
    /// Expiry as a time-to-live in seconds.
    pub ttl_seconds: Option<i64>,
    /// Absolute expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the served entry was stored.
    pub cached_at: Option<DateTime<Utc>>,
}

impl CacheMetadata {
    /// Returns a copy without the fields that change between runs of the
    /// same query.
    #[must_use]
    pub fn stable(&self) -> Self {
        Self {
            enabled: self.enabled,
            depends_on: self.depends_on.clone(),
            ttl_seconds: self.ttl_seconds,
            ..Self::default()
        }
    }

    /// Resolves the configured expiry against `now`.
    ///
    /// # Errors
    ///
    /// Fails when both an absolute expiry and a ttl are set.
    pub fn expiry(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        get_expire(
            self.expires_at,
            self.ttl_seconds.map(TimeDelta::seconds),
            now,
        )
    }
}

/// Expiry of a cached result: either an absolute time or a ttl, never both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Absolute expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Time-to-live from the moment the result is stored.
    pub ttl: Option<TimeDelta>,
}

/// Resolves an expiry from an absolute time or a ttl.
///
/// # Errors
///
/// Returns an invalid-argument error when both are given.
pub fn get_expire(
    expires_at: Option<DateTime<Utc>>,
    ttl: Option<TimeDelta>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match (expires_at, ttl) {
        (Some(_), Some(_)) => Err(TypedalError::InvalidArgument(String::from(
            "supply either an expiry date or a ttl, not both",
        ))),
        (None, Some(ttl)) => Ok(Some(now + ttl)),
        (expires_at, None) => Ok(expires_at),
    }
}

/// Hashes the parts of a query into a cache key.
#[must_use]
pub fn hash_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    // length-prefixed so part boundaries can not shift
    let hasher = parts.into_iter().fold(Sha256::new(), |hasher, part| {
        let part = part.as_ref().as_bytes();
        hasher
            .chain_update(part.len().to_le_bytes())
            .chain_update(part)
    });
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Works out which `(table, id)` pairs a result depends on.
///
/// `qualifiers` maps every qualifier used in the select (table names and
/// aliases) to its real table. Without `depends_on`, every `*.id` column is
/// a dependency; otherwise only the named columns are, where a bare column
/// name belongs to `base`.
#[must_use]
pub fn dependencies<'a, I>(
    base: &str,
    qualifiers: &BTreeMap<String, String>,
    rows: I,
    depends_on: &[String],
) -> Vec<Dependency>
where
    I: IntoIterator<Item = &'a FlatRow>,
{
    let targets: BTreeSet<String> = depends_on
        .iter()
        .map(|field| {
            if field.contains('.') {
                field.clone()
            } else {
                format!("{base}.{field}")
            }
        })
        .collect();

    let mut found = BTreeSet::new();
    for row in rows {
        for (label, value) in row {
            let Some((qualifier, column)) = label.rsplit_once('.') else {
                continue;
            };
            let table = qualifiers
                .get(qualifier)
                .map_or(qualifier, String::as_str);
            let wanted = if targets.is_empty() {
                column == "id"
            } else {
                targets.contains(&format!("{table}.{column}"))
                    || targets.contains(label.as_str())
            };
            if !wanted {
                continue;
            }
            if let SqlValue::Int(id) = value {
                found.insert((String::from(table), *id));
            }
        }
    }
    found.into_iter().collect()
}
