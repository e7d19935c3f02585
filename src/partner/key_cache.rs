// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for partner public keys.
//!
//! Redirect verification needs the partner's current signing key. Caching it
//! per provider keeps callbacks verifiable through short partner outages.
//! Callers invalidate on a verification failure so a rotated key is picked
//! up on the next lookup. Such refetches are limited to one per provider per
//! refetch interval, so unverifiable callbacks cannot drive partner traffic.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Cached entry: base64 public key + insertion timestamp.
struct CacheEntry {
    public_key: String,
    inserted_at: Instant,
}

/// Minimum spacing of rejection-driven refetches for one provider.
pub const DEFAULT_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// In-process cache of partner public keys keyed by provider id.
pub struct PartnerKeyCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    refetched_at: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
    refetch_interval: Duration,
}

impl PartnerKeyCache {
    /// Create a new cache with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            refetched_at: Mutex::new(LruCache::new(capacity)),
            ttl,
            refetch_interval: DEFAULT_REFETCH_INTERVAL,
        }
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    /// Get the cached key for a provider.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, provider_id: &str) -> Option<String> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(provider_id) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.public_key.clone());
            }
            cache.pop(provider_id);
        }
        None
    }

    pub fn put(&self, provider_id: &str, public_key: String) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                provider_id.to_string(),
                CacheEntry {
                    public_key,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Claim the provider's refetch slot after a rejected signature.
    ///
    /// Returns `false` while a previous refetch is younger than the interval.
    pub fn try_begin_refetch(&self, provider_id: &str) -> bool {
        let Ok(mut refetched) = self.refetched_at.lock() else {
            return false;
        };
        if let Some(last) = refetched.get(provider_id) {
            if last.elapsed() < self.refetch_interval {
                return false;
            }
        }
        refetched.put(provider_id.to_string(), Instant::now());
        true
    }

    pub fn invalidate(&self, provider_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(provider_id);
        }
    }
}
