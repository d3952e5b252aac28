// Process-local parameter cache addressed by a SHA-256 digest of the name.
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheEntry {
    pub name: String,
    pub derived_key: String,
    pub value: String,
    pub ordinal: usize,
}

/// Name to value cache that also enumerates entries in insertion order.
///
/// Lookups go through [`derive_key`], so names may contain any characters.
/// Deleted entries leave an empty slot behind; ordinals are never reused or
/// compacted.
#[derive(Clone, Debug, Default)]
pub struct LocalCache {
    index: HashMap<String, usize>,
    slots: Vec<Option<CacheEntry>>,
}

pub fn derive_key(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, name: &str, value: impl Into<String>) {
        let key = derive_key(name);
        let value = value.into();
        if let Some(&ordinal) = self.index.get(&key) {
            if let Some(Some(entry)) = self.slots.get_mut(ordinal) {
                entry.value = value;
                return;
            }
        }
        let ordinal = self.slots.len();
        self.index.insert(key.clone(), ordinal);
        self.slots.push(Some(CacheEntry {
            name: name.to_string(),
            derived_key: key,
            value,
            ordinal,
        }));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|entry| entry.value.as_str())
    }

    pub fn entry(&self, name: &str) -> Option<&CacheEntry> {
        let ordinal = *self.index.get(&derive_key(name))?;
        self.slots.get(ordinal)?.as_ref()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Returns whether an entry was removed; deleting twice is a no-op.
    pub fn delete(&mut self, name: &str) -> bool {
        let Some(ordinal) = self.index.remove(&derive_key(name)) else {
            return false;
        };
        self.slots
            .get_mut(ordinal)
            .map(|slot| slot.take().is_some())
            .unwrap_or(false)
    }

    pub fn iter(&self) -> CacheIter<'_> {
        CacheIter {
            slots: self.slots.iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
    }
}

pub struct CacheIter<'a> {
    slots: std::slice::Iter<'a, Option<CacheEntry>>,
}

impl<'a> Iterator for CacheIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Some(entry) = slot {
                return Some((entry.name.as_str(), entry.value.as_str()));
            }
        }
        None
    }
}

impl<'a> IntoIterator for &'a LocalCache {
    type Item = (&'a str, &'a str);
    type IntoIter = CacheIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalCache, derive_key};

    #[test]
    fn derive_key_is_stable_hex_digest() {
        let key = derive_key("/app/token");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, derive_key("/app/token"));
        assert_ne!(key, derive_key("/app/token2"));
        assert_eq!(
            derive_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn put_then_get_returns_value() {
        let mut cache = LocalCache::new();
        for name in ["/app/token", "with space", "semi;colon$", "ünïcødé/ключ", ""] {
            cache.put(name, format!("value of {name}"));
            assert_eq!(cache.get(name), Some(format!("value of {name}").as_str()));
        }
    }

    #[test]
    fn delete_removes_entry_and_is_idempotent() {
        let mut cache = LocalCache::new();
        cache.put("/app/token", "secret123");
        assert!(cache.delete("/app/token"));
        assert!(!cache.exists("/app/token"));
        assert_eq!(cache.get("/app/token"), None);
        assert!(!cache.delete("/app/token"));
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_keeps_ordinal_and_does_not_duplicate() {
        let mut cache = LocalCache::new();
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("c", "3");
        cache.put("b", "two");

        let listed: Vec<_> = cache.iter().collect();
        assert_eq!(listed, vec![("a", "1"), ("b", "two"), ("c", "3")]);
        assert_eq!(cache.entry("b").map(|entry| entry.ordinal), Some(1));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn iteration_skips_deleted_slots_and_restarts() {
        let mut cache = LocalCache::new();
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("c", "3");
        cache.delete("b");

        let first: Vec<_> = cache.iter().map(|(name, _)| name).collect();
        let second: Vec<_> = (&cache).into_iter().map(|(name, _)| name).collect();
        assert_eq!(first, vec!["a", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn reinserting_deleted_name_appends_new_ordinal() {
        let mut cache = LocalCache::new();
        cache.put("a", "1");
        cache.put("b", "2");
        cache.delete("a");
        cache.put("a", "again");

        let listed: Vec<_> = cache.iter().collect();
        assert_eq!(listed, vec![("b", "2"), ("a", "again")]);
        assert_eq!(cache.entry("a").map(|entry| entry.ordinal), Some(2));
    }
}
