//! Bidirectional tag registry.
//!
//! Tracks which cache keys carry which tags so that invalidating a tag can
//! find its entries, and evicting an entry can drop it from every tag.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{CacheKey, Tag};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

#[derive(Default)]
pub struct TagRegistry {
    tag_to_keys: RwLock<HashMap<Tag, HashSet<CacheKey>>>,
    key_to_tags: RwLock<HashMap<CacheKey, HashSet<Tag>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `key` with `tags`, replacing any tags it had before.
    pub fn register(&self, key: &CacheKey, tags: &[Tag]) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "register.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "register.key_to_tags");

        if let Some(previous) = k2t.remove(key) {
            detach(&mut t2k, key, previous);
        }
        if tags.is_empty() {
            return;
        }

        for tag in tags {
            t2k.entry(tag.clone()).or_default().insert(key.clone());
        }
        k2t.insert(key.clone(), tags.iter().cloned().collect());
    }

    /// Drop `key` from every tag it carries.
    pub fn unregister(&self, key: &CacheKey) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "unregister.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "unregister.key_to_tags");

        if let Some(tags) = k2t.remove(key) {
            detach(&mut t2k, key, tags);
        }
    }

    /// Remove a tag and return the keys that carried it.
    ///
    /// The returned keys are also dropped from any other tag they carried.
    pub fn take_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "take_tag.tag_to_keys");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "take_tag.key_to_tags");

        let keys = t2k.remove(tag).unwrap_or_default();
        for key in &keys {
            if let Some(mut tags) = k2t.remove(key) {
                tags.remove(tag);
                detach(&mut t2k, key, tags);
            }
        }
        keys
    }

    pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        rw_read(&self.tag_to_keys, SOURCE, "keys_for_tag")
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &CacheKey) -> HashSet<Tag> {
        rw_read(&self.key_to_tags, SOURCE, "tags_for_key")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_keys, SOURCE, "tag_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_tags, SOURCE, "key_count").len()
    }
}

fn detach(
    tag_to_keys: &mut HashMap<Tag, HashSet<CacheKey>>,
    key: &CacheKey,
    tags: HashSet<Tag>,
) {
    for tag in tags {
        if let Some(keys) = tag_to_keys.get_mut(&tag) {
            keys.remove(key);
            if keys.is_empty() {
                tag_to_keys.remove(&tag);
            }
        }
    }
}
