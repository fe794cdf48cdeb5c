//! Expiring in-process cache for marketplace schema data.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use marketsync_channels::{CategoryNode, ChannelAttribute};

use crate::api::DictionaryValue;

const MAX_ENTRIES: usize = 1024;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// String-keyed cache with one TTL for all entries.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        (Instant::now() < entry.expires_at).then(|| entry.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_ENTRIES {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
        }
        entries.insert(key.into(), CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        });
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Cached attribute dictionary.
#[derive(Debug, Clone)]
pub enum Dictionary {
    Values(Arc<Vec<DictionaryValue>>),
    /// Fetch gave up after the page cap; retrying within the TTL is pointless.
    Oversized,
}

/// Everything the handler caches, keyed by seller client id.
pub struct SchemaCache {
    pub categories: TtlCache<Arc<CategoryNode>>,
    pub attributes: TtlCache<Arc<Vec<ChannelAttribute>>>,
    pub dictionaries: TtlCache<Dictionary>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            categories: TtlCache::new(ttl),
            attributes: TtlCache::new(ttl),
            dictionaries: TtlCache::new(ttl),
        }
    }

    pub fn clear(&self) {
        self.categories.clear();
        self.attributes.clear();
        self.dictionaries.clear();
    }
}

pub fn categories_key(client_id: &str) -> String {
    format!("categories:{client_id}")
}

pub fn attributes_key(client_id: &str, category_id: &str) -> String {
    format!("attrs:{client_id}:{category_id}")
}

pub fn dictionary_key(client_id: &str, category_id: i64, attribute_id: i64) -> String {
    format!("dict:{client_id}:{category_id}:{attribute_id}")
}
