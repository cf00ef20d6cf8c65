//! Per-page memo of resolution winners.
//!
//! Entries are keyed by category, normalised hint and page identity. Only one
//! page is held at a time: storing a winner for a new page drops the rest.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::category::Category;
use crate::similarity::normalize_text;
use crate::types::ScoreBreakdown;

/// Page identity for cache keys: the address without its fragment
pub fn page_identity(address: &str) -> &str {
    address.split('#').next().unwrap_or(address)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    category: Category,
    hint: String,
    page: String,
}

impl CacheKey {
    fn new(category: Category, hint: Option<&str>, address: &str) -> Self {
        Self {
            category,
            hint: hint.map(normalize_text).unwrap_or_default(),
            page: page_identity(address).to_string(),
        }
    }
}

/// Last winner for one (category, hint, page) key
#[derive(Debug, Clone)]
pub struct CacheEntry<N> {
    pub node: N,
    pub score: ScoreBreakdown,
    pub stored_at: Instant,
}

/// Short-lived memo of resolution winners.
///
/// Liveness is checked by the caller against the driver; this type only
/// handles keys and expiry.
#[derive(Debug)]
pub struct ResolutionCache<N> {
    entries: HashMap<CacheKey, CacheEntry<N>>,
    ttl: Duration,
}

impl<N: Clone> ResolutionCache<N> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Entry for the key, evicting it first if it outlived the TTL
    pub fn lookup(
        &mut self,
        category: Category,
        hint: Option<&str>,
        address: &str,
    ) -> Option<CacheEntry<N>> {
        let key = CacheKey::new(category, hint, address);
        let expired = self
            .entries
            .get(&key)
            .is_some_and(|entry| entry.stored_at.elapsed() > self.ttl);
        if expired {
            debug!("Cache entry for {} expired", category);
            self.entries.remove(&key);
            return None;
        }
        self.entries.get(&key).cloned()
    }

    /// Store a winner, dropping expired entries and those of other pages
    pub fn insert(
        &mut self,
        category: Category,
        hint: Option<&str>,
        address: &str,
        node: N,
        score: ScoreBreakdown,
    ) {
        let key = CacheKey::new(category, hint, address);
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|k, entry| k.page == key.page && entry.stored_at.elapsed() <= ttl);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!("Evicted {} cache entries", evicted);
        }
        self.entries.insert(
            key,
            CacheEntry {
                node,
                score,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every hint cached for the category on this page, returning
    /// whether anything was held
    pub fn invalidate(&mut self, category: Category, address: &str) -> bool {
        let page = page_identity(address);
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !(k.category == category && k.page == page));
        self.entries.len() < before
    }

    /// Drop everything, returning how many entries were held
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
