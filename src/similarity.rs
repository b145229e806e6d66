//! Bounded, persisted similarity index.
//!
//! Stores one embedding vector per song, capacity-bounded with
//! least-recently-used eviction, and answers cosine top-K queries. A single
//! mutex serializes every operation; at the documented capacity (5000
//! entries) correctness is worth far more than lock granularity.
//!
//! Queries scan a bounded candidate buffer (most-recently-used ids,
//! refreshed periodically) instead of sorting the whole index each time.
//! The index snapshots itself to JSON every `flush_interval` inserts and on
//! clear/shutdown; snapshot failures are logged and swallowed, in-memory
//! state keeps serving.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Rebuild the candidate buffer after this many inserts.
const BUFFER_REFRESH_INTERVAL: usize = 32;

#[derive(Debug)]
struct Entry {
    vector: Vec<f64>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct IndexInner {
    entries: HashMap<i64, Entry>,
    /// Most-recently-used ids, queried instead of the full map.
    candidates: Vec<i64>,
    inserts_since_refresh: usize,
    inserts_since_flush: usize,
    /// Monotonic use counter backing the LRU order.
    tick: u64,
}

/// Capacity-bounded embedding store with cosine top-K lookup.
pub struct SimilarityIndex {
    inner: Mutex<IndexInner>,
    capacity: usize,
    buffer_cap: usize,
    flush_interval: usize,
    snapshot_path: Option<PathBuf>,
}

impl SimilarityIndex {
    /// Creates an empty index. `snapshot_path` of `None` disables
    /// persistence (used by tests and the in-memory fallback).
    #[must_use]
    pub fn new(
        capacity: usize,
        buffer_cap: usize,
        flush_interval: usize,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Mutex::new(IndexInner::default()),
            capacity: capacity.max(1),
            buffer_cap: buffer_cap.max(1),
            flush_interval: flush_interval.max(1),
            snapshot_path,
        }
    }

    /// Loads the snapshot from disk if one exists, truncating to capacity
    /// when the stored snapshot exceeds it.
    pub fn load(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        if !path.exists() {
            return;
        }

        let loaded: Result<HashMap<i64, Vec<f64>>> = fs::read_to_string(path)
            .with_context(|| format!("Failed to read similarity snapshot at {}", path.display()))
            .and_then(|raw| {
                serde_json::from_str(&raw).context("Failed to decode similarity snapshot")
            });

        match loaded {
            Ok(map) => {
                let mut inner = self.lock();
                inner.entries.clear();
                for (id, vector) in map.into_iter().take(self.capacity) {
                    inner.tick += 1;
                    let tick = inner.tick;
                    inner.entries.insert(id, Entry { vector, last_used: tick });
                }
                Self::refresh_candidates(&mut inner, self.buffer_cap);
                log::info!("Loaded similarity snapshot with {} entries", inner.entries.len());
            }
            Err(e) => log::warn!("Ignoring unreadable similarity snapshot: {e:#}"),
        }
    }

    /// Stores (clones) a vector for `song_id`, evicting the least-recently
    /// used entry when over capacity. Snapshots every `flush_interval`
    /// inserts.
    pub fn store(&self, song_id: i64, vector: &[f64]) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            song_id,
            Entry {
                vector: vector.to_vec(),
                last_used: tick,
            },
        );

        while inner.entries.len() > self.capacity {
            if let Some(&lru) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id)
            {
                inner.entries.remove(&lru);
                log::trace!("Evicted LRU similarity entry for song {lru}");
            }
        }

        inner.inserts_since_refresh += 1;
        if inner.inserts_since_refresh >= BUFFER_REFRESH_INTERVAL
            || inner.candidates.len() < inner.entries.len().min(self.buffer_cap)
        {
            Self::refresh_candidates(&mut inner, self.buffer_cap);
        }

        inner.inserts_since_flush += 1;
        if inner.inserts_since_flush >= self.flush_interval {
            inner.inserts_since_flush = 0;
            self.write_snapshot(&inner);
        }
    }

    /// Returns a clone of the stored vector and marks the entry as used.
    pub fn get(&self, song_id: i64) -> Option<Vec<f64>> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(&song_id).map(|entry| {
            entry.last_used = tick;
            entry.vector.clone()
        })
    }

    /// Cosine similarity between two stored songs, if both are indexed.
    pub fn similarity_between(&self, a: i64, b: i64) -> Option<f64> {
        let inner = self.lock();
        let va = inner.entries.get(&a)?;
        let vb = inner.entries.get(&b)?;
        Some(cosine_similarity(&va.vector, &vb.vector))
    }

    /// Top-`k` entries by cosine similarity to `query`, excluding nothing.
    ///
    /// Returns exactly `min(k, len)` hits sorted by descending similarity
    /// (ties broken by ascending id, keeping results deterministic).
    pub fn find_similar(&self, query: &[f64], k: usize) -> Vec<(i64, f64)> {
        let inner = self.lock();

        // The buffer holds min(len, buffer_cap) ids; fall back to a full
        // scan when the caller asks for more than the buffer covers.
        let scan_all = k > inner.candidates.len() && inner.candidates.len() < inner.entries.len();

        let mut scored: Vec<(i64, f64)> = if scan_all {
            inner
                .entries
                .iter()
                .map(|(id, e)| (*id, cosine_similarity(query, &e.vector)))
                .collect()
        } else {
            inner
                .candidates
                .iter()
                .filter_map(|id| {
                    inner
                        .entries
                        .get(id)
                        .map(|e| (*id, cosine_similarity(query, &e.vector)))
                })
                .collect()
        };

        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });
        scored.truncate(k);
        scored
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry and persists the empty snapshot. Idempotent.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.candidates.clear();
        inner.inserts_since_flush = 0;
        inner.inserts_since_refresh = 0;
        self.write_snapshot(&inner);
    }

    /// Forces a snapshot write; called on shutdown.
    pub fn flush(&self) {
        let mut inner = self.lock();
        inner.inserts_since_flush = 0;
        self.write_snapshot(&inner);
    }

    fn refresh_candidates(inner: &mut IndexInner, buffer_cap: usize) {
        let mut ids: Vec<(i64, u64)> = inner
            .entries
            .iter()
            .map(|(id, e)| (*id, e.last_used))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        ids.truncate(buffer_cap);
        inner.candidates = ids.into_iter().map(|(id, _)| id).collect();
        inner.inserts_since_refresh = 0;
    }

    fn write_snapshot(&self, inner: &IndexInner) {
        let Some(path) = &self.snapshot_path else {
            return;
        };

        let map: HashMap<i64, &Vec<f64>> =
            inner.entries.iter().map(|(id, e)| (*id, &e.vector)).collect();

        let result = serde_json::to_string(&map)
            .context("Failed to encode similarity snapshot")
            .and_then(|json| {
                fs::write(path, json).with_context(|| {
                    format!("Failed to write similarity snapshot to {}", path.display())
                })
            });

        match result {
            Ok(()) => log::debug!("Flushed similarity snapshot ({} entries)", map.len()),
            // In-memory state keeps serving; the next flush reconciles.
            Err(e) => log::warn!("Similarity snapshot failed: {e:#}"),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Cosine similarity of two vectors; 0.0 when either norm vanishes or the
/// dimensions disagree.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unbounded() -> SimilarityIndex {
        SimilarityIndex::new(100, 100, 1000, None)
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_find_similar_count_order_and_idempotence() {
        let index = unbounded();
        index.store(1, &[1.0, 0.0, 0.0]);
        index.store(2, &[0.9, 0.1, 0.0]);
        index.store(3, &[0.0, 1.0, 0.0]);

        let query = [1.0, 0.0, 0.0];
        let hits = index.find_similar(&query, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert!(hits[0].1 >= hits[1].1);

        // Asking for more than exists returns exactly the index size.
        assert_eq!(index.find_similar(&query, 10).len(), 3);

        // Idempotent for a fixed index and query.
        assert_eq!(index.find_similar(&query, 3), index.find_similar(&query, 3));
    }

    #[test]
    fn test_capacity_bound_holds_across_stores() {
        let index = SimilarityIndex::new(5, 5, 1000, None);
        for id in 0..50 {
            index.store(id, &[id as f64, 1.0]);
            assert!(index.len() <= 5);
        }
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let index = SimilarityIndex::new(3, 3, 1000, None);
        index.store(1, &[1.0]);
        index.store(2, &[1.0]);
        index.store(3, &[1.0]);

        // Touch 1 so 2 becomes the LRU entry.
        index.get(1);
        index.store(4, &[1.0]);

        assert!(index.get(2).is_none());
        assert!(index.get(1).is_some());
        assert!(index.get(3).is_some());
        assert!(index.get(4).is_some());
    }

    #[test]
    fn test_store_clones_input() {
        let index = unbounded();
        let mut vector = vec![1.0, 2.0];
        index.store(1, &vector);
        vector[0] = 99.0;
        assert_eq!(index.get(1), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_snapshot_round_trip_and_capacity_truncation() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("similarity.json");

        let index = SimilarityIndex::new(10, 10, 1000, Some(path.clone()));
        for id in 0..6 {
            index.store(id, &[id as f64, 1.0]);
        }
        index.flush();

        // Reload into a smaller index: snapshot must be truncated to fit.
        let reloaded = SimilarityIndex::new(4, 4, 1000, Some(path));
        reloaded.load();
        assert_eq!(reloaded.len(), 4);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let index =
            SimilarityIndex::new(10, 10, 1000, Some(dir.path().join("similarity.json")));
        index.store(1, &[1.0]);
        index.clear();
        index.clear();
        assert!(index.is_empty());
        assert!(index.find_similar(&[1.0], 5).is_empty());
    }

    #[test]
    fn test_missing_snapshot_is_not_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let index = SimilarityIndex::new(10, 10, 1000, Some(dir.path().join("nope.json")));
        index.load();
        assert!(index.is_empty());
    }
}
