//! # Cohort Cache
//! Short-lived, process-wide cache of raw candidate rows keyed by the
//! normalised make/model, the fetch limit, and the filter fingerprint of the
//! executing ladder step. TTL stays small (seconds) so stale availability
//! never leaks into a cohort. Values are cloned on the way out, so callers
//! may mutate freely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::listing::ListingRow;

struct Entry {
    at: Instant,
    rows: Vec<ListingRow>,
}

pub struct CohortCache {
    ttl: Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl CohortCache {
    /// A zero TTL disables the cache entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(make_norm: &str, model_norm: &str, limit: i64, fingerprint: &str) -> String {
        format!("{make_norm}\u{1f}{model_norm}\u{1f}{limit}\u{1f}{fingerprint}")
    }

    /// Fresh rows for `key`, or `None` when absent/expired. Expired entries
    /// are dropped on sight.
    pub fn get(&self, key: &str) -> Option<Vec<ListingRow>> {
        if self.ttl.is_zero() {
            return None;
        }
        let mut map = self.inner.lock().expect("cohort cache mutex poisoned");
        match map.get(key) {
            Some(entry) if entry.at.elapsed() < self.ttl => Some(entry.rows.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, rows: &[ListingRow]) {
        if self.ttl.is_zero() {
            return;
        }
        let mut map = self.inner.lock().expect("cohort cache mutex poisoned");
        // Opportunistic sweep keeps the map from accumulating dead cohorts.
        map.retain(|_, entry| entry.at.elapsed() < self.ttl);
        map.insert(
            key,
            Entry {
                at: Instant::now(),
                rows: rows.to_vec(),
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("cohort cache mutex poisoned").len()
    }
}
