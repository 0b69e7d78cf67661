use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

/// Tag to resident keys, maintained on every insert and removal so a ban
/// touches only the keys it names.
#[derive(Debug)]
pub struct TagIndex<K> {
    by_tag: HashMap<String, HashSet<K>>,
}

impl<K: Clone + Eq + Hash> TagIndex<K> {
    pub fn new() -> Self {
        Self {
            by_tag: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: &K, tags: &BTreeSet<String>) {
        for tag in tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    pub fn remove(&mut self, key: &K, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    pub fn keys(&self, tag: &str) -> Vec<K> {
        self.by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
    }
}

impl<K: Clone + Eq + Hash> Default for TagIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut index = TagIndex::new();
        index.insert(&1, &tags(&["users", "eu"]));
        index.insert(&2, &tags(&["users"]));

        let mut users = index.keys("users");
        users.sort();
        assert_eq!(users, vec![1, 2]);
        assert_eq!(index.keys("eu"), vec![1]);
        assert!(index.keys("missing").is_empty());
    }

    #[test]
    fn test_remove_drops_empty_tags() {
        let mut index = TagIndex::new();
        index.insert(&1, &tags(&["a", "b"]));
        index.remove(&1, &tags(&["a", "b"]));
        assert_eq!(index.tag_count(), 0);
    }
}
