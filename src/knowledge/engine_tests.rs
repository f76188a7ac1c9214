//! End-to-end tests for the retrieval pipeline: cache, semantic, and
//! lexical paths against a real on-disk store.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::knowledge::engine::RetrievalEngine;
use crate::knowledge::types::SearchFilters;

const DIM: usize = 128;

/// Deterministic bag-of-words embedding: each token bumps one hashed
/// dimension, so texts sharing tokens score high and disjoint texts
/// score near zero.
struct MockProvider;

fn mock_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        v[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_id(&self) -> &str {
        "test:bag-of-words"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(mock_vector(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| mock_vector(t)).collect())
    }
}

/// Provider that answers like [`MockProvider`] but only after a long
/// sleep, for exercising the query deadline.
struct SlowProvider;

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    fn model_id(&self) -> &str {
        "test:slow"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(vec![text.to_string()]).await?;
        Ok(batch.pop().unwrap())
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(texts.iter().map(|t| mock_vector(t)).collect())
    }
}

/// Provider whose every call fails, forcing the lexical path.
struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn model_id(&self) -> &str {
        "test:failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("provider unavailable")
    }

    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        bail!("provider unavailable")
    }
}

fn temp_db(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "recalldb-test-{}-{}-{}",
        name,
        std::process::id(),
        nanos
    ))
}

async fn engine_at(db_path: &PathBuf, provider: Arc<dyn EmbeddingProvider>) -> RetrievalEngine {
    let engine = RetrievalEngine::with_db_path(Config::default(), provider, db_path)
        .await
        .unwrap();
    engine.load().await.unwrap();
    engine
}

#[tokio::test]
async fn test_add_then_search_semantic() {
    let db = temp_db("semantic");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let id = engine
        .add_knowledge(
            "switch ka price kya hai",
            "Anchor switch Rs 45, Havells Rs 85",
            HashMap::new(),
            1.5,
        )
        .await
        .unwrap();
    assert!(id.starts_with("kb_"));

    let results = engine
        .search_knowledge("switch ka price kya hai", 3, &SearchFilters::default(), true)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Anchor switch Rs 45, Havells Rs 85");
    assert_eq!(results[0].source_id, id);
    assert!(results[0].confidence >= 0.7);
    assert!(!results[0].cache_hit);
    assert!(results[0].processing_time >= 0.0);
}

#[tokio::test]
async fn test_repeated_query_served_from_cache() {
    let db = temp_db("cache");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    engine
        .add_knowledge("wire rate", "Copper wire Rs 28 per meter", HashMap::new(), 1.0)
        .await
        .unwrap();

    let first = engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert!(!first[0].cache_hit);

    let second = engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].cache_hit);
    assert_eq!(second[0].text, first[0].text);

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.queries.total_queries, 2);
    assert_eq!(stats.queries.cache_hits, 1);
}

#[tokio::test]
async fn test_use_cache_false_skips_cache() {
    let db = temp_db("nocache");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    engine
        .add_knowledge("wire rate", "Copper wire Rs 28 per meter", HashMap::new(), 1.0)
        .await
        .unwrap();

    let first = engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), false)
        .await
        .unwrap();
    let second = engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), false)
        .await
        .unwrap();

    assert!(!first[0].cache_hit);
    assert!(!second[0].cache_hit);
    assert_eq!(engine.get_cache_stats().query_cache.size, 0);
}

#[tokio::test]
async fn test_duplicate_responses_deduplicated() {
    let db = temp_db("dedup");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    engine
        .add_knowledge("mcb price", "MCB Rs 320", HashMap::new(), 1.0)
        .await
        .unwrap();
    engine
        .add_knowledge("mcb price kitna", "MCB Rs 320", HashMap::new(), 1.0)
        .await
        .unwrap();

    let results = engine
        .search_knowledge("mcb price", 5, &SearchFilters::default(), true)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "MCB Rs 320");
}

#[tokio::test]
async fn test_identical_adds_get_distinct_ids() {
    let db = temp_db("distinct");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let a = engine
        .add_knowledge("fan price", "Ceiling fan Rs 1450", HashMap::new(), 1.0)
        .await
        .unwrap();
    let b = engine
        .add_knowledge("fan price", "Ceiling fan Rs 1450", HashMap::new(), 1.0)
        .await
        .unwrap();

    assert_ne!(a, b);
    assert!(engine.get_knowledge(&a).await.is_some());
    assert!(engine.get_knowledge(&b).await.is_some());
    assert_eq!(engine.entry_count().await, 2);
}

#[tokio::test]
async fn test_lexical_fallback_when_provider_fails() {
    let db = temp_db("lexical");
    let engine = engine_at(&db, Arc::new(FailingProvider)).await;

    engine
        .add_knowledge("switch price", "Anchor switch Rs 45", HashMap::new(), 1.0)
        .await
        .unwrap();

    let results = engine
        .search_knowledge("switch price", 3, &SearchFilters::default(), true)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].confidence > 0.0);
    assert_eq!(results[0].text, "Anchor switch Rs 45");

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.queries.lexical_served, 1);
    assert_eq!(stats.indexed_entries, 0);
    assert!(stats.index_kind.is_none());
}

#[tokio::test]
async fn test_domain_filter() {
    let db = temp_db("filter");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let mut metadata = HashMap::new();
    metadata.insert(
        "domain".to_string(),
        serde_json::Value::String("electrical".to_string()),
    );
    engine
        .add_knowledge("switch price", "Anchor switch Rs 45", metadata, 1.0)
        .await
        .unwrap();

    let matching = SearchFilters {
        domain: Some("electrical".to_string()),
        ..Default::default()
    };
    let results = engine
        .search_knowledge("switch price", 3, &matching, true)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    let wrong = SearchFilters {
        domain: Some("plumbing".to_string()),
        ..Default::default()
    };
    let results = engine
        .search_knowledge("switch price", 3, &wrong, true)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_filters_distinguish_cached_queries() {
    let db = temp_db("filter-cache");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let mut metadata = HashMap::new();
    metadata.insert(
        "domain".to_string(),
        serde_json::Value::String("electrical".to_string()),
    );
    engine
        .add_knowledge("switch price", "Anchor switch Rs 45", metadata, 1.0)
        .await
        .unwrap();

    // Prime the cache with the unfiltered query, then make sure the
    // filtered variant does not alias onto it
    engine
        .search_knowledge("switch price", 3, &SearchFilters::default(), true)
        .await
        .unwrap();

    let wrong = SearchFilters {
        domain: Some("plumbing".to_string()),
        ..Default::default()
    };
    let results = engine
        .search_knowledge("switch price", 3, &wrong, true)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let db = temp_db("empty");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let results = engine
        .search_knowledge("   ", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_add_rejects_blank_text() {
    let db = temp_db("blank");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    assert!(engine
        .add_knowledge("", "response", HashMap::new(), 1.0)
        .await
        .is_err());
    assert!(engine
        .add_knowledge("input", "  ", HashMap::new(), 1.0)
        .await
        .is_err());
    assert_eq!(engine.entry_count().await, 0);
}

#[tokio::test]
async fn test_reload_from_disk() {
    let db = temp_db("reload");

    {
        let engine = engine_at(&db, Arc::new(MockProvider)).await;
        engine
            .add_knowledge("wire rate", "Copper wire Rs 28 per meter", HashMap::new(), 1.0)
            .await
            .unwrap();
    }

    let engine = engine_at(&db, Arc::new(MockProvider)).await;
    assert_eq!(engine.entry_count().await, 1);

    let results = engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Copper wire Rs 28 per meter");
}

#[tokio::test]
async fn test_reload_backfills_missing_embeddings() {
    let db = temp_db("backfill");

    // First run cannot embed, entry lands without a vector
    {
        let engine = engine_at(&db, Arc::new(FailingProvider)).await;
        engine
            .add_knowledge("switch price", "Anchor switch Rs 45", HashMap::new(), 1.0)
            .await
            .unwrap();
    }

    // Second run embeds it during load and serves it semantically
    let engine = engine_at(&db, Arc::new(MockProvider)).await;
    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.indexed_entries, 1);
    assert_eq!(stats.index_kind.as_deref(), Some("flat"));

    let results = engine
        .search_knowledge("switch price", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_access_counts_persist() {
    let db = temp_db("access");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    let id = engine
        .add_knowledge("wire rate", "Copper wire Rs 28 per meter", HashMap::new(), 1.0)
        .await
        .unwrap();

    engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), false)
        .await
        .unwrap();
    engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), false)
        .await
        .unwrap();

    let entry = engine.get_knowledge(&id).await.unwrap();
    assert_eq!(entry.access_count, 2);
    assert!(entry.last_accessed.is_some());

    // Counters survive a reload
    let engine = engine_at(&db, Arc::new(MockProvider)).await;
    let entry = engine.get_knowledge(&id).await.unwrap();
    assert_eq!(entry.access_count, 2);
}

#[tokio::test]
async fn test_below_threshold_no_match() {
    let db = temp_db("threshold");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    engine
        .add_knowledge("switch price", "Anchor switch Rs 45", HashMap::new(), 1.0)
        .await
        .unwrap();

    let results = engine
        .search_knowledge("unrelated plumbing query", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert!(results.is_empty());

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.queries.empty_results, 1);
}

#[tokio::test]
async fn test_index_switches_to_clustered_past_threshold() {
    let db = temp_db("clustered");
    let mut config = Config::default();
    config.index.flat_threshold = 4;

    let engine = RetrievalEngine::with_db_path(config, Arc::new(MockProvider), &db)
        .await
        .unwrap();
    engine.load().await.unwrap();

    let inputs = [
        "switch price",
        "wire rate",
        "fan price",
        "mcb rating",
        "socket price",
    ];
    for (i, input) in inputs.iter().enumerate() {
        engine
            .add_knowledge(input, &format!("Answer {}", i), HashMap::new(), 1.0)
            .await
            .unwrap();
    }

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.index_kind.as_deref(), Some("ivf_flat"));
    assert_eq!(stats.indexed_entries, 5);

    // Entries appended after the rebuild still resolve to their slots
    let results = engine
        .search_knowledge("socket price", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert!(results
        .iter()
        .any(|r| r.text == "Answer 4" && r.confidence >= 0.7));

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.queries.semantic_served, 1);
}

#[tokio::test]
async fn test_semantic_timeout_falls_back_to_lexical() {
    let db = temp_db("timeout");
    let mut config = Config::default();
    config.search.timeout_ms = 20;

    let engine = RetrievalEngine::with_db_path(config, Arc::new(SlowProvider), &db)
        .await
        .unwrap();
    engine.load().await.unwrap();

    // Mixed case so the query embedding cannot reuse the cached add-path
    // vector and must wait out the slow provider
    engine
        .add_knowledge("Switch Price", "Anchor switch Rs 45", HashMap::new(), 1.0)
        .await
        .unwrap();

    let results = engine
        .search_knowledge("switch price", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Anchor switch Rs 45");
    assert!(results[0].confidence > 0.0);

    let stats = engine.get_performance_stats().await;
    assert_eq!(stats.queries.lexical_served, 1);
    assert_eq!(stats.queries.semantic_served, 0);
    assert_eq!(stats.indexed_entries, 1);
}

#[tokio::test]
async fn test_cleanup_clears_caches() {
    let db = temp_db("cleanup");
    let engine = engine_at(&db, Arc::new(MockProvider)).await;

    engine
        .add_knowledge("wire rate", "Copper wire Rs 28 per meter", HashMap::new(), 1.0)
        .await
        .unwrap();
    engine
        .search_knowledge("wire rate", 3, &SearchFilters::default(), true)
        .await
        .unwrap();
    assert!(engine.get_cache_stats().query_cache.size > 0);

    engine.cleanup();
    let stats = engine.get_cache_stats();
    assert_eq!(stats.query_cache.size, 0);
    assert_eq!(stats.embedding_cache.size, 0);
}
