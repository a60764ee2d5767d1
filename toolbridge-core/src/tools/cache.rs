//! TTL result cache with single-flight lookups
//!
//! Entries are keyed by tool name plus canonicalized parameters. Each key owns
//! a slot guarded by an async lock, and the whole lookup-invoke-store sequence
//! runs under that lock, so concurrent identical calls reach the provider once.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache key: hex SHA-256 of the tool name and canonical parameters
pub fn cache_key(tool: &str, params: &Value) -> String {
    let canonical = canonicalize(params).to_string();
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recursively sort object keys so equal parameters hash equally
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone)]
struct Slot {
    tool: String,
    entry: Arc<Mutex<Option<CacheEntry>>>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.entry
            .try_lock()
            .is_ok_and(|entry| entry.as_ref().is_some_and(|e| e.is_live(now)))
    }

    /// Held only by the table and without a live entry. Only meaningful on
    /// the table's own copy.
    fn is_dead(&self, now: Instant) -> bool {
        Arc::strong_count(&self.entry) == 1
            && self
                .entry
                .try_lock()
                .is_ok_and(|entry| !entry.as_ref().is_some_and(|e| e.is_live(now)))
    }
}

/// Table size below which inserts never trigger a sweep
const MIN_SWEEP: usize = 64;

#[derive(Debug)]
struct SlotTable {
    slots: HashMap<String, Slot>,
    sweep_at: usize,
}

impl SlotTable {
    /// Drop dead slots and push the next sweep out to twice the survivors
    fn prune(&mut self, now: Instant) {
        self.slots.retain(|_, slot| !slot.is_dead(now));
        self.sweep_at = (self.slots.len() * 2).max(MIN_SWEEP);
    }
}

/// Outcome of [`ResultCache::get_or_compute`]
#[derive(Debug)]
pub struct CacheLookup<E> {
    /// The cached or freshly computed value
    pub result: Result<Value, E>,

    /// Whether the value came from the cache
    pub hit: bool,
}

/// TTL cache for successful tool results
///
/// Slots are released once nobody holds them and they carry no live entry,
/// so the table tracks live entries plus in-flight keys rather than every
/// key ever seen.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    table: Mutex<SlotTable>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Create a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            table: Mutex::new(SlotTable {
                slots: HashMap::new(),
                sweep_at: MIN_SWEEP,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn slot(&self, key: &str, tool: &str) -> Slot {
        let mut table = self.table.lock().await;
        if let Some(slot) = table.slots.get(key) {
            return slot.clone();
        }

        if table.slots.len() >= table.sweep_at {
            table.prune(Instant::now());
        }
        let slot = Slot {
            tool: tool.to_string(),
            entry: Arc::new(Mutex::new(None)),
        };
        table.slots.insert(key.to_string(), slot.clone());
        slot
    }

    /// Give back a caller's handle, removing the slot if it is now dead
    async fn release(&self, key: &str, slot: Slot) {
        let mut table = self.table.lock().await;
        drop(slot);
        if table
            .slots
            .get(key)
            .is_some_and(|s| s.is_dead(Instant::now()))
        {
            table.slots.remove(key);
        }
    }

    /// Return the live entry for `(tool, params)` or run `compute` and store
    /// its value if it succeeds. Failures are never cached.
    ///
    /// Dropping the returned future while it waits on another caller's
    /// computation is safe: the wait is abandoned and the computation goes on.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        tool: &str,
        params: &Value,
        compute: F,
    ) -> CacheLookup<E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let key = cache_key(tool, params);
        let slot = self.slot(&key, tool).await;
        let lookup = self.lookup_or_compute(&slot, compute).await;
        self.release(&key, slot).await;
        lookup
    }

    async fn lookup_or_compute<F, Fut, E>(&self, slot: &Slot, compute: F) -> CacheLookup<E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let mut entry = slot.entry.lock().await;
        let now = Instant::now();

        if let Some(cached) = entry.as_ref().filter(|e| e.is_live(now)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return CacheLookup {
                result: Ok(cached.value.clone()),
                hit: true,
            };
        }

        // Expired entries are evicted lazily here
        *entry = None;
        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;
        if let Ok(value) = &result {
            // A slot removed by clear() while computing is orphaned, so this
            // store is dropped along with it
            *entry = Some(CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + self.ttl,
            });
        }

        CacheLookup { result, hit: false }
    }

    /// Drop cached results for one tool, or for all tools
    pub async fn clear(&self, tool: Option<&str>) {
        let mut table = self.table.lock().await;
        match tool {
            Some(tool) => table.slots.retain(|_, slot| slot.tool != tool),
            None => table.slots.clear(),
        }
    }

    /// Number of live entries. Slots with a computation in flight are not
    /// counted. Expired slots are pruned as a side effect.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        table.prune(now);
        table.slots.values().filter(|slot| slot.is_live(now)).count()
    }

    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.table.lock().await.slots.len()
    }

    /// Whether the cache has no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Lifetime hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lifetime miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// hits / (hits + misses), or 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
