//! Time-bounded cache with an injectable clock
//!
//! Values are stored behind `Arc` and replaced wholesale on `set`, so a reader
//! holding a value never observes a later writer's changes. Writers that
//! change the underlying data call `invalidate` for the affected key.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// One hundred years
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

struct Entry<V> {
    value: Arc<V>,
    expires_at: DateTime<Utc>,
}

/// Key-value cache whose entries expire after a fixed time to live
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Cache on the wall clock with a TTL in seconds
    pub fn with_ttl_secs(ttl_secs: u64) -> Self {
        Self::new(
            Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            Arc::new(SystemClock),
        )
    }

    /// Live value for a key; expired entries read as absent
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = self.clock.now();
        let entries = self.entries.read().ok()?;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Insert or replace a value, restarting its time to live
    pub fn set(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let expires_at = self.clock.now() + self.ttl;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                Entry {
                    value: Arc::clone(&value),
                    expires_at,
                },
            );
        }
        value
    }

    /// Drop one key; returns whether it was present
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Remove every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .write()
            .map(|mut entries| {
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                before - entries.len()
            })
            .unwrap_or(0)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
