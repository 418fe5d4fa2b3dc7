//! Process-wide dictionary cache.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::schema::Dict;

/// Copy-on-write map of dictionary id to definition.
///
/// Readers load a snapshot without locking. Writers replace entries while
/// holding the dictionary's write lock, in the same critical section as the
/// storage change.
pub struct DictCache {
    dicts: ArcSwap<HashMap<String, Arc<Dict>>>,
}

impl Default for DictCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DictCache {
    pub fn new() -> Self {
        Self {
            dicts: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn get(&self, dict_id: &str) -> Option<Arc<Dict>> {
        self.dicts.load().get(dict_id).cloned()
    }

    /// Inserts or replaces one entry.
    pub fn put(&self, dict: Dict) -> Arc<Dict> {
        let dict = Arc::new(dict);
        self.dicts.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(dict.id.clone(), dict.clone());
            next
        });
        dict
    }

    pub fn evict(&self, dict_id: &str) {
        self.dicts.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(dict_id);
            next
        });
    }

    /// Replaces the whole cache.
    pub fn replace_all(&self, dicts: Vec<Dict>) {
        let map = dicts
            .into_iter()
            .map(|dict| (dict.id.clone(), Arc::new(dict)))
            .collect();
        self.dicts.store(Arc::new(map));
    }

    /// Returns every cached dictionary sorted by id.
    pub fn all(&self) -> Vec<Arc<Dict>> {
        let mut dicts: Vec<_> = self.dicts.load().values().cloned().collect();
        dicts.sort_by(|a, b| a.id.cmp(&b.id));
        dicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_put_get_evict() {
        let cache = DictCache::new();
        cache.put(Dict::new("b", "sql"));
        cache.put(Dict::new("a", "sql"));
        assert_eq!(cache.get("a").unwrap().engine, "sql");

        let snapshot = cache.get("b").unwrap();
        cache.put(Dict::new("b", "document"));
        assert_eq!(snapshot.engine, "sql");
        assert_eq!(cache.get("b").unwrap().engine, "document");

        cache.evict("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.all().len(), 1);
    }

    #[timeout(1000)]
    #[test]
    fn test_replace_all() {
        let cache = DictCache::new();
        cache.put(Dict::new("old", "sql"));
        cache.replace_all(vec![Dict::new("x", "sql"), Dict::new("y", "sql")]);
        let ids: Vec<_> = cache.all().iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
