//! Cache collaborator contract and in-process implementation
//!
//! The engine treats the cache as a side-channel accelerator, never a
//! source of truth: reads never block a write path, and every cache failure
//! is logged and swallowed by the caller. Entries are tenant-scoped and
//! tag-indexed so a wallet mutation can evict everything associated with
//! that wallet in one call.

use crate::types::TenantId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cache failure; logged by callers, never surfaced to their callers
#[derive(Error, Debug)]
#[error("Cache error: {0}")]
pub struct CacheError(pub String);

/// Result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Read-through/invalidate-on-write cache contract
pub trait Cache: Send + Sync {
    /// Look up a tenant-scoped entry
    fn get(&self, key: &str, tenant: &TenantId) -> CacheResult<Option<Vec<u8>>>;

    /// Store a tenant-scoped entry, associating it with `tags`
    fn set(&self, key: &str, value: Vec<u8>, tags: &[String], tenant: &TenantId)
        -> CacheResult<()>;

    /// Drop a single entry
    fn invalidate(&self, key: &str, tenant: &TenantId) -> CacheResult<()>;

    /// Drop every entry associated with `tag`
    fn invalidate_tag(&self, tag: &str) -> CacheResult<()>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache with per-entry TTL and tag sets
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    tags: DashMap<String, HashSet<String>>,
    ttl: Duration,
    prefix: String,
}

impl MemoryCache {
    /// Create a cache with the given default TTL and key prefix
    pub fn new(ttl: Duration, prefix: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            tags: DashMap::new(),
            ttl,
            prefix: prefix.into(),
        }
    }

    /// Create from configuration
    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(
            Duration::from_secs(config.default_ttl_secs),
            config.key_prefix.clone(),
        )
    }

    fn entry_key(&self, key: &str, tenant: &TenantId) -> String {
        format!("{}{}:{}", self.prefix, tenant, key)
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str, tenant: &TenantId) -> CacheResult<Option<Vec<u8>>> {
        let entry_key = self.entry_key(key, tenant);

        let expired = match self.entries.get(&entry_key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(&entry_key);
        }
        Ok(None)
    }

    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        tags: &[String],
        tenant: &TenantId,
    ) -> CacheResult<()> {
        let entry_key = self.entry_key(key, tenant);

        self.entries.insert(
            entry_key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );

        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(entry_key.clone());
        }

        Ok(())
    }

    fn invalidate(&self, key: &str, tenant: &TenantId) -> CacheResult<()> {
        self.entries.remove(&self.entry_key(key, tenant));
        Ok(())
    }

    fn invalidate_tag(&self, tag: &str) -> CacheResult<()> {
        if let Some((_, keys)) = self.tags.remove(tag) {
            for key in keys {
                self.entries.remove(&key);
            }
        }
        Ok(())
    }
}
