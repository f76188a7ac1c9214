// Copyright 2026 Recalldb Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which stage of the retrieval state machine served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    Cache,
    Semantic,
    Lexical,
    Empty,
}

/// Running counters shared across concurrent queries.
#[derive(Debug, Default)]
pub struct StatsCollector {
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    semantic_served: AtomicU64,
    lexical_served: AtomicU64,
    empty_results: AtomicU64,
    index_searches: AtomicU64,
    store_searches: AtomicU64,
    embeddings_batched: AtomicU64,
    total_query_micros: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, path: RetrievalPath, latency: Duration) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);

        match path {
            RetrievalPath::Cache => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            RetrievalPath::Semantic => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.semantic_served.fetch_add(1, Ordering::Relaxed);
            }
            RetrievalPath::Lexical => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.lexical_served.fetch_add(1, Ordering::Relaxed);
            }
            RetrievalPath::Empty => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.empty_results.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_index_search(&self) {
        self.index_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_search(&self) {
        self.store_searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_embeddings_batched(&self, count: usize) {
        self.embeddings_batched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.total_queries.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.cache_hits.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn snapshot(&self) -> QueryStats {
        let total = self.total_queries.load(Ordering::Relaxed);
        let total_micros = self.total_query_micros.load(Ordering::Relaxed);
        let avg_query_time_ms = if total == 0 {
            0.0
        } else {
            total_micros as f64 / total as f64 / 1000.0
        };

        QueryStats {
            total_queries: total,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
            semantic_served: self.semantic_served.load(Ordering::Relaxed),
            lexical_served: self.lexical_served.load(Ordering::Relaxed),
            empty_results: self.empty_results.load(Ordering::Relaxed),
            index_searches: self.index_searches.load(Ordering::Relaxed),
            store_searches: self.store_searches.load(Ordering::Relaxed),
            embeddings_batched: self.embeddings_batched.load(Ordering::Relaxed),
            avg_query_time_ms,
        }
    }
}

/// Point-in-time view of the query counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub semantic_served: u64,
    pub lexical_served: u64,
    pub empty_results: u64,
    pub index_searches: u64,
    pub store_searches: u64,
    pub embeddings_batched: u64,
    pub avg_query_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_query_paths() {
        let stats = StatsCollector::new();
        stats.record_query(RetrievalPath::Semantic, Duration::from_millis(10));
        stats.record_query(RetrievalPath::Cache, Duration::from_millis(1));
        stats.record_query(RetrievalPath::Lexical, Duration::from_millis(5));
        stats.record_query(RetrievalPath::Empty, Duration::from_millis(2));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_queries, 4);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 3);
        assert_eq!(snapshot.semantic_served, 1);
        assert_eq!(snapshot.lexical_served, 1);
        assert_eq!(snapshot.empty_results, 1);
        assert!((snapshot.cache_hit_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_avg_latency() {
        let stats = StatsCollector::new();
        stats.record_query(RetrievalPath::Semantic, Duration::from_millis(10));
        stats.record_query(RetrievalPath::Semantic, Duration::from_millis(30));

        let snapshot = stats.snapshot();
        assert!((snapshot.avg_query_time_ms - 20.0).abs() < 0.5);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = StatsCollector::new().snapshot();
        assert_eq!(snapshot.total_queries, 0);
        assert_eq!(snapshot.avg_query_time_ms, 0.0);
        assert_eq!(snapshot.cache_hit_rate, 0.0);
    }
}
