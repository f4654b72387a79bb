//! Process-local TTL key-value store plus typed JSON helpers.
//!
//! The geocode and station caches are shared by every worker of their stage,
//! so the map sits behind a single lock.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use climatesignal_common::EnrichError;

use crate::traits::CacheStore;

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

/// Read and decode a cached JSON value. Store failures and entries that fail
/// to decode are logged and reported as a miss.
pub async fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, treating as miss");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            let err = EnrichError::CacheCorruption {
                key: key.to_string(),
                message: e.to_string(),
            };
            warn!(error = %err, "Discarding corrupt cache entry");
            None
        }
    }
}

/// Encode and store a JSON value. Failures are logged, never propagated.
pub async fn set_json<T: Serialize>(store: &dyn CacheStore, key: &str, ttl: Duration, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Failed to encode cache value");
            return;
        }
    };
    if let Err(e) = store.setex(key, ttl, raw).await {
        warn!(key, error = %e, "Cache write failed");
    }
}
