//! Bounded LRU caches for immutable chain facts
//!
//! Checksummed addresses, contract ABIs and block timestamps never change
//! once known, so they are memoized, but never without a capacity bound.

use alloy_primitives::Address;
use archive_common::{ArchiveError, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::str::FromStr;

pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| ArchiveError::ConfigError("cache capacity must be greater than 0".to_string()))?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// EIP-55 checksum form of addresses, memoized by raw input
pub struct ChecksumCache {
    cache: BoundedCache<String, String>,
}

impl ChecksumCache {
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            cache: BoundedCache::new(capacity)?,
        })
    }

    pub fn checksum(&self, raw: &str) -> Result<String> {
        let key = raw.trim().to_ascii_lowercase();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let address = Address::from_str(&key)
            .map_err(|e| ArchiveError::Decode(format!("invalid address {}: {}", raw, e)))?;
        let checksummed = address.to_checksum(None);
        self.cache.put(key, checksummed.clone());
        Ok(checksummed)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
