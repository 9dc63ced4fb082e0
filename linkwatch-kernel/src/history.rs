//! Per-source history store.
//!
//! One `SourceHistory` per source identifier, created lazily on first use and
//! kept for the process lifetime. The outer `DashMap` shards by key so
//! different sources never contend; each history sits behind its own mutex so
//! updates for the same source serialize.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::state::{new_state, Shared};

/// Latency samples retained per source.
pub const LATENCY_WINDOW: usize = 20;

#[derive(Debug, Default)]
pub struct SourceHistory {
    latencies: VecDeque<f64>,
    message_count: u64,
    failed_deliveries: u64,
}

impl SourceHistory {
    fn push_latency(&mut self, latency_ms: f64) {
        self.latencies.push_back(latency_ms);
        while self.latencies.len() > LATENCY_WINDOW {
            self.latencies.pop_front();
        }
    }

    fn view(&self) -> HistoryView {
        HistoryView {
            latencies: self.latencies.iter().copied().collect(),
            message_count: self.message_count,
            failed_deliveries: self.failed_deliveries,
        }
    }
}

/// Copy of a source's history taken under its lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryView {
    /// Oldest first.
    pub latencies: Vec<f64>,
    pub message_count: u64,
    pub failed_deliveries: u64,
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    sources: DashMap<String, Shared<SourceHistory>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, source_id: &str) -> Shared<SourceHistory> {
        if let Some(existing) = self.sources.get(source_id) {
            return Arc::clone(existing.value());
        }
        // shard lock is released before the caller locks the history
        Arc::clone(
            self.sources
                .entry(source_id.to_string())
                .or_insert_with(|| new_state(SourceHistory::default()))
                .value(),
        )
    }

    /// Append a latency sample, evicting the oldest beyond the window.
    pub fn record_latency(&self, source_id: &str, latency_ms: f64) {
        self.entry(source_id).lock().push_latency(latency_ms);
    }

    /// Increment the source's message counter and return the new value.
    pub fn increment_count(&self, source_id: &str) -> u64 {
        let history = self.entry(source_id);
        let mut h = history.lock();
        h.message_count += 1;
        h.message_count
    }

    /// Count one record for this source that the sink rejected.
    pub fn record_failed_delivery(&self, source_id: &str) -> u64 {
        let history = self.entry(source_id);
        let mut h = history.lock();
        h.failed_deliveries += 1;
        h.failed_deliveries
    }

    /// Count the message and append its latency in one critical section,
    /// returning the updated history.
    pub fn observe(&self, source_id: &str, latency_ms: f64) -> HistoryView {
        let history = self.entry(source_id);
        let mut h = history.lock();
        h.message_count += 1;
        h.push_latency(latency_ms);
        h.view()
    }

    /// Current history of a source; unknown sources read as empty.
    pub fn view(&self, source_id: &str) -> HistoryView {
        let Some(history) = self.sources.get(source_id).map(|e| Arc::clone(e.value())) else {
            return HistoryView::default();
        };
        let view = history.lock().view();
        view
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    /// Views of every tracked source, sorted by identifier.
    pub fn snapshot(&self) -> Vec<(String, HistoryView)> {
        let mut all: Vec<(String, HistoryView)> = self
            .sources
            .iter()
            .map(|e| (e.key().clone(), e.value().lock().view()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_window_keeps_most_recent_twenty() {
        let store = HistoryStore::new();
        for i in 0..25 {
            store.record_latency("sensor/a", i as f64);
        }
        let view = store.view("sensor/a");
        let expected: Vec<f64> = (5..25).map(|i| i as f64).collect();
        assert_eq!(view.latencies, expected);
    }

    #[test]
    fn test_counter_increments() {
        let store = HistoryStore::new();
        assert_eq!(store.increment_count("s"), 1);
        assert_eq!(store.increment_count("s"), 2);
        assert_eq!(store.increment_count("other"), 1);
    }

    #[test]
    fn test_unknown_source_is_empty() {
        let store = HistoryStore::new();
        let view = store.view("never-seen");
        assert!(view.latencies.is_empty());
        assert_eq!(view.message_count, 0);
        assert!(!store.contains("never-seen"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_observe_updates_both() {
        let store = HistoryStore::new();
        store.observe("s", 10.0);
        let view = store.observe("s", 12.0);
        assert_eq!(view.message_count, 2);
        assert_eq!(view.latencies, vec![10.0, 12.0]);
    }

    #[test]
    fn test_failed_deliveries_per_source() {
        let store = HistoryStore::new();
        assert_eq!(store.record_failed_delivery("a"), 1);
        assert_eq!(store.view("a").failed_deliveries, 1);
        assert_eq!(store.view("b").failed_deliveries, 0);
    }

    #[test]
    fn test_concurrent_same_source_counts_all() {
        let store = Arc::new(HistoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..100 {
                        store.observe("shared", 1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let view = store.view("shared");
        assert_eq!(view.message_count, 800);
        assert_eq!(view.latencies.len(), LATENCY_WINDOW);
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = HistoryStore::new();
        store.observe("b", 1.0);
        store.observe("a", 2.0);
        let names: Vec<String> = store.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
