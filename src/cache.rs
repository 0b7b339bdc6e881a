//! Persistent TTL caches for location lookups
//!
//! Vendor location-search and geocoding calls are rate-limited and slow,
//! while IATA codes and geocoordinates for a named city essentially never
//! change. Long-TTL durable caching is therefore the dominant efficiency
//! lever: every lookup is keyed by a normalized query and stored in a local
//! sled tree, with lazy expiry on read and an explicit cleanup sweep.
//!
//! Every storage path here is fail-open: a broken or unavailable store is a
//! cache miss, never an error the caller sees.

use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::TripError;

/// On-disk schema version. Upgrades are additive: new trees may appear,
/// existing trees are never rewritten.
const SCHEMA_VERSION: u32 = 1;
const SCHEMA_KEY: &[u8] = b"schema_version";

const CODE_TREE: &str = "iata_codes";
const COORD_TREE: &str = "coordinates";
const SESSION_TREE: &str = "sessions";

/// IATA codes for a named city change on the order of decades.
const CODE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Geocoordinates are effectively immutable.
const COORD_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Normalize a free-text lookup key so cache addressing is stable
/// regardless of input casing and surrounding whitespace.
pub fn normalize_key(query: &str) -> String {
    query.trim().to_lowercase()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One durable cache record. `original_query` preserves the pre-normalized
/// text for debugging cache contents.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<V> {
    value: V,
    original_query: String,
    created_at: i64,
}

/// Handle to the durable lookup store: one sled database holding the code
/// cache, the coordinate cache and the session bundles.
pub struct CacheStore {
    db: sled::Db,
    codes: sled::Tree,
    coords: sled::Tree,
    sessions: sled::Tree,
}

impl CacheStore {
    /// Open (or create) the store at `path` and verify the schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TripError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            TripError::ConfigError(format!(
                "Cannot open cache store at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let version_bytes = SCHEMA_VERSION.to_be_bytes().to_vec();
        match db.get(SCHEMA_KEY) {
            Ok(Some(raw)) if raw.as_ref() == version_bytes.as_slice() => {}
            Ok(other) => {
                if let Some(raw) = other {
                    debug!(found = ?raw, "Upgrading cache schema version marker");
                }
                let _ = db.insert(SCHEMA_KEY, version_bytes);
            }
            Err(e) => warn!(error = %e, "Cannot read cache schema version"),
        }

        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| TripError::ConfigError(format!("Cannot open cache tree {}: {}", name, e)))
        };
        let codes = open_tree(CODE_TREE)?;
        let coords = open_tree(COORD_TREE)?;
        let sessions = open_tree(SESSION_TREE)?;

        Ok(Self {
            db,
            codes,
            coords,
            sessions,
        })
    }

    /// The airport/city code cache (30-day TTL).
    pub fn codes(&self) -> LookupCache<String> {
        LookupCache::new(self.codes.clone(), CODE_TTL, CODE_TREE)
    }

    /// The coordinate cache (365-day TTL).
    pub fn coords(&self) -> LookupCache<crate::Coordinates> {
        LookupCache::new(self.coords.clone(), COORD_TTL, COORD_TREE)
    }

    pub(crate) fn session_tree(&self) -> sled::Tree {
        self.sessions.clone()
    }

    /// Flush pending writes to disk. Best-effort; sled also flushes in the
    /// background.
    pub fn flush(&self) {
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "Cache flush failed");
        }
    }
}

/// Aggregate counters for one cache tree.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub approx_size_bytes: usize,
}

/// A typed key→value view over one sled tree with a fixed TTL.
///
/// `get`/`set` never fail: storage and decode errors are logged and treated
/// as a miss or a dropped write.
pub struct LookupCache<V> {
    tree: sled::Tree,
    ttl: Duration,
    name: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> LookupCache<V>
where
    V: Serialize + DeserializeOwned,
{
    fn new(tree: sled::Tree, ttl: Duration, name: &'static str) -> Self {
        Self {
            tree,
            ttl,
            name,
            _value: PhantomData,
        }
    }

    fn is_expired(&self, created_at: i64, now: i64) -> bool {
        now.saturating_sub(created_at) >= self.ttl.as_millis() as i64
    }

    /// Look up a value by (normalized) query. Expired entries are removed
    /// on read and reported as a miss.
    pub fn get(&self, query: &str) -> Option<V> {
        self.get_at(query, now_ms())
    }

    fn get_at(&self, query: &str, now: i64) -> Option<V> {
        let key = normalize_key(query);
        let raw = match self.tree.get(key.as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(cache = self.name, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<V> = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                // Undecodable entries are dead weight; drop them.
                warn!(cache = self.name, key = %key, error = %e, "Dropping undecodable cache entry");
                let _ = self.tree.remove(key.as_bytes());
                return None;
            }
        };

        if self.is_expired(entry.created_at, now) {
            debug!(cache = self.name, key = %key, "Cache entry expired");
            if let Err(e) = self.tree.remove(key.as_bytes()) {
                warn!(cache = self.name, error = %e, "Cannot remove expired entry");
            }
            return None;
        }

        debug!(cache = self.name, key = %key, "Cache hit");
        Some(entry.value)
    }

    /// Store a value under the normalized query, overwriting any previous
    /// entry. Write failures trigger one best-effort expiry sweep (frees
    /// space on a full store) and a single retry.
    pub fn set(&self, query: &str, value: V) {
        self.set_at(query, value, now_ms());
    }

    fn set_at(&self, query: &str, value: V, now: i64) {
        let key = normalize_key(query);
        let entry = CacheEntry {
            value,
            original_query: query.to_string(),
            created_at: now,
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(cache = self.name, error = %e, "Cannot encode cache entry, dropped");
                return;
            }
        };

        if let Err(e) = self.tree.insert(key.as_bytes(), bytes.clone()) {
            warn!(cache = self.name, error = %e, "Cache write failed, sweeping expired entries");
            let removed = self.cleanup_at(now);
            if removed == 0 || self.tree.insert(key.as_bytes(), bytes).is_err() {
                warn!(cache = self.name, key = %key, "Cache write dropped");
            }
        }
    }

    /// Delete every entry whose age has reached the TTL. Returns the number
    /// removed. Idempotent; safe to run concurrently with reads and writes
    /// since entries are independent.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(now_ms())
    }

    fn cleanup_at(&self, now: i64) -> usize {
        let mut removed = 0;
        for item in self.tree.iter() {
            let (key, raw) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(cache = self.name, error = %e, "Cleanup scan aborted");
                    break;
                }
            };
            let expired = match serde_json::from_slice::<CacheEntry<serde_json::Value>>(&raw) {
                Ok(entry) => self.is_expired(entry.created_at, now),
                Err(_) => true,
            };
            if expired && self.tree.remove(&key).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(cache = self.name, removed, "Cleanup removed expired entries");
        }
        removed
    }

    /// Remove all entries unconditionally.
    pub fn clear(&self) {
        if let Err(e) = self.tree.clear() {
            warn!(cache = self.name, error = %e, "Cache clear failed");
        }
    }

    /// Scan the tree and report entry counts, timestamp range and
    /// approximate on-disk size.
    pub fn stats(&self) -> CacheStats {
        let now = now_ms();
        let mut stats = CacheStats {
            total: 0,
            valid: 0,
            expired: 0,
            oldest: None,
            newest: None,
            approx_size_bytes: 0,
        };

        for item in self.tree.iter() {
            let (key, raw) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(cache = self.name, error = %e, "Stats scan aborted");
                    break;
                }
            };
            stats.total += 1;
            stats.approx_size_bytes += key.len() + raw.len();

            if let Ok(entry) = serde_json::from_slice::<CacheEntry<serde_json::Value>>(&raw) {
                if self.is_expired(entry.created_at, now) {
                    stats.expired += 1;
                } else {
                    stats.valid += 1;
                }
                stats.oldest = Some(match stats.oldest {
                    Some(oldest) => oldest.min(entry.created_at),
                    None => entry.created_at,
                });
                stats.newest = Some(match stats.newest {
                    Some(newest) => newest.max(entry.created_at),
                    None => entry.created_at,
                });
            } else {
                stats.expired += 1;
            }
        }

        stats
    }
}
