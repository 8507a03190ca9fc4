//! Age-based cache shared by all clones of a client.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A string-keyed cache whose entries expire purely by age.
///
/// The TTL is supplied on read, so one entry can be fresh for a caller with a
/// long TTL and stale for another. Concurrent refreshes are last-writer-wins.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached value if it is younger than `ttl`. A zero TTL always misses.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        if ttl.is_zero() {
            return None;
        }
        let entries = self.entries.read();
        let (fetched_at, value) = entries.get(key)?;
        (fetched_at.elapsed() < ttl).then(|| value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.write().insert(key.into(), (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn insert_aged(&self, key: &str, value: V, age: Duration) {
        let fetched_at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        self.entries.write().insert(key.to_string(), (fetched_at, value));
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
