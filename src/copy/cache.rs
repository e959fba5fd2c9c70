use std::collections::HashMap;
use std::hash::Hash;

/// What the cache remembers for one source identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheData<T> {
    pub target: T,
    /// Shallowest depth at which the source has been reached so far.
    pub min_depth: usize,
}

/// Source identity -> materialized target, for one copy/insert operation.
#[derive(Debug, Clone)]
pub struct IdentityCache<K, T> {
    entries: HashMap<K, CacheData<T>>,
}

impl<K: Eq + Hash, T> IdentityCache<K, T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&CacheData<T>> {
        self.entries.get(key)
    }

    pub fn target(&self, key: &K) -> Option<&T> {
        self.entries.get(key).map(|d| &d.target)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: K, target: T, depth: usize) {
        self.entries.insert(
            key,
            CacheData {
                target,
                min_depth: depth,
            },
        );
    }

    /// Records that `key` was reached again at `depth`. Returns `true` when
    /// this is shallower than any earlier visit.
    pub fn reach(&mut self, key: &K, depth: usize) -> bool {
        match self.entries.get_mut(key) {
            Some(data) if depth < data.min_depth => {
                data.min_depth = depth;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for IdentityCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
