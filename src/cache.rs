// Copyright 2026 Recalldb Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    tick: u64,
}

/// Fixed-capacity key/value cache with per-entry TTL and LRU eviction.
///
/// Each instance is internally synchronized; two instances never contend
/// on the same lock. An entry is expired once `now - inserted_at > ttl`.
/// Inserting a new key at capacity evicts the least-recently-used entry
/// before expiry is consulted.
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up a key, refreshing its recency on a hit. Expired entries are
    /// removed as a side effect and reported as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();

        let expired = match inner.map.get(key) {
            None => return None,
            Some(slot) => slot.inserted_at.elapsed() > self.ttl,
        };

        if expired {
            inner.map.remove(key);
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.map.get_mut(key)?;
        slot.last_used = tick;
        Some(slot.value.clone())
    }

    /// Insert or refresh a key. Refreshing an existing key resets both its
    /// insertion time and its recency order.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(slot) = inner.map.get_mut(&key) {
            slot.value = value;
            slot.inserted_at = Instant::now();
            slot.last_used = tick;
            return;
        }

        if inner.map.len() >= self.capacity {
            if let Some(lru) = inner
                .map
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
            {
                inner.map.remove(&lru);
            }
        }

        inner.map.insert(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
