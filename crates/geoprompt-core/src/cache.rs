//! Bounded insertion-order cache
//!
//! All AOI-derived caches in this repo share one discipline: a plain map
//! with a hard item cap, evicting the oldest-inserted entry on overflow.
//! Re-inserting an existing key refreshes the value but not its age.
//! Callers wrap the cache in a mutex; a put that races another put may
//! evict either entry but never corrupts the map.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug)]
pub struct BoundedCache<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    max_items: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(max_items: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).cloned()
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_none() {
            self.order.push_back(key.clone());
        }
        while self.map.len() > self.max_items {
            match self.order.pop_front() {
                // Never evict the entry we just inserted.
                Some(oldest) if oldest != key => {
                    self.map.remove(&oldest);
                }
                Some(oldest) => self.order.push_back(oldest),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_insertion() {
        let mut cache = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn reinsert_refreshes_value_not_age() {
        let mut cache = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.get(&"a"), Some(10));
        // "a" is still the oldest insertion, so it goes first.
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn capacity_one_keeps_latest() {
        let mut cache = BoundedCache::new(1);
        cache.put(1, "x");
        cache.put(2, "y");
        assert_eq!(cache.get(&2), Some("y"));
        assert_eq!(cache.len(), 1);
    }
}
