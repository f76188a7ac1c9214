use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::embedding::{EmbeddingPipeline, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::knowledge::store::KnowledgeStore;
use crate::knowledge::types::{
    CacheInfo, CacheStats, KnowledgeEntry, PerformanceStats, QueryResult, SearchFilters,
};
use crate::stats::{RetrievalPath, StatsCollector};

/// In-memory working set guarded by one lock. `slots[i]` holds the id of
/// the entry stored at index slot `i`, so index hits resolve to entries
/// without touching the durable store.
struct Corpus {
    entries: HashMap<String, KnowledgeEntry>,
    slots: Vec<String>,
    index: Option<VectorIndex>,
    next_seq: u64,
}

impl Corpus {
    fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            slots: Vec::new(),
            index: None,
            next_seq: 0,
        }
    }

    fn indexed_entries(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len())
    }
}

/// Hybrid retrieval engine over a durable entry store.
///
/// Queries run through a fixed pipeline: result cache, then semantic
/// search over the vector index, then lexical term overlap against the
/// store. Degraded embedding infrastructure never fails a query; only
/// durable-store write failures surface to callers.
pub struct RetrievalEngine {
    config: Config,
    store: KnowledgeStore,
    pipeline: EmbeddingPipeline,
    corpus: RwLock<Corpus>,
    query_cache: TtlCache<String, Vec<QueryResult>>,
    stats: StatsCollector,
    dim: usize,
}

impl RetrievalEngine {
    /// Open the engine against the configured database directory. The
    /// provider is probed once for its vector dimension; a failing probe
    /// falls back to the configured dimension so startup still succeeds.
    pub async fn new(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let db_path = config.database_path()?;
        Self::with_db_path(config, provider, &db_path).await
    }

    /// Open the engine against an explicit database directory.
    pub async fn with_db_path(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        db_path: &Path,
    ) -> Result<Self> {
        let pipeline = EmbeddingPipeline::new(provider, &config.embedding);

        let dim = match pipeline.embed("dimension probe").await {
            Ok(vector) if !vector.is_empty() => vector.len(),
            Ok(_) => {
                tracing::warn!(
                    fallback = config.embedding.fallback_dimension,
                    "embedding probe returned an empty vector, using fallback dimension"
                );
                config.embedding.fallback_dimension
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = config.embedding.fallback_dimension,
                    "embedding probe failed, using fallback dimension"
                );
                config.embedding.fallback_dimension
            }
        };

        let store = KnowledgeStore::new(db_path, dim).await?;
        let query_cache = TtlCache::new(
            config.cache.capacity,
            Duration::from_secs(config.cache.ttl_secs),
        );

        Ok(Self {
            config,
            store,
            pipeline,
            corpus: RwLock::new(Corpus::empty()),
            query_cache,
            stats: StatsCollector::new(),
            dim,
        })
    }

    /// Load persisted entries into the working set and build the vector
    /// index. Entries persisted without an embedding are embedded now when
    /// the provider cooperates; failures leave them on the lexical path.
    pub async fn load(&self) -> Result<()> {
        let mut entries = self.store.load_all().await?;

        let pending: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        if !pending.is_empty() {
            let texts: Vec<String> = pending
                .iter()
                .map(|&i| entries[i].input_text.clone())
                .collect();

            match self.pipeline.embed_batch(&texts).await {
                Ok(vectors) => {
                    self.stats.record_embeddings_batched(vectors.len());
                    for (&i, vector) in pending.iter().zip(vectors.into_iter()) {
                        entries[i].embedding = Some(vector);
                        if let Err(e) = self.store.upsert(&entries[i]).await {
                            tracing::warn!(
                                id = %entries[i].id,
                                error = %e,
                                "failed to persist backfilled embedding"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        count = pending.len(),
                        error = %e,
                        "embedding backfill failed, entries stay lexical-only"
                    );
                }
            }
        }

        let mut slots = Vec::new();
        let mut vectors = Vec::new();
        for entry in &entries {
            if let Some(vector) = &entry.embedding {
                slots.push(entry.id.clone());
                vectors.push(vector.clone());
            }
        }

        let index = if vectors.is_empty() {
            None
        } else {
            let dim = self.dim;
            let flat_threshold = self.config.index.flat_threshold;
            let nprobe = self.config.index.nprobe;
            let index = tokio::task::spawn_blocking(move || {
                VectorIndex::build(vectors, dim, flat_threshold, nprobe)
            })
            .await??;
            tracing::info!(
                entries = entries.len(),
                indexed = index.len(),
                kind = index.kind(),
                "vector index built"
            );
            Some(index)
        };

        let next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);

        let mut corpus = self.corpus.write().await;
        corpus.entries = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        corpus.slots = slots;
        corpus.index = index;
        corpus.next_seq = next_seq;

        Ok(())
    }

    /// Add a knowledge entry, returning its id.
    ///
    /// The durable write happens first; if it fails nothing becomes
    /// visible and the error propagates. An embedding failure degrades the
    /// entry to lexical-only retrieval instead of failing the add.
    pub async fn add_knowledge(
        &self,
        input_text: &str,
        response_text: &str,
        metadata: HashMap<String, serde_json::Value>,
        importance_score: f32,
    ) -> Result<String> {
        if input_text.trim().is_empty() {
            bail!("input text must not be empty");
        }
        if response_text.trim().is_empty() {
            bail!("response text must not be empty");
        }

        let embedding = match self.pipeline.embed(input_text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, entry will be lexical-only");
                None
            }
        };

        let mut corpus = self.corpus.write().await;

        let mut entry = KnowledgeEntry::new(
            input_text.to_string(),
            response_text.to_string(),
            metadata,
            importance_score,
            corpus.next_seq,
        );
        entry.embedding = embedding;

        self.store.add(&entry).await?;
        corpus.next_seq += 1;

        if let Some(vector) = entry.embedding.clone() {
            self.index_new_entry(&mut corpus, entry.id.clone(), vector)
                .await?;
        }

        let id = entry.id.clone();
        corpus.entries.insert(entry.id.clone(), entry);
        drop(corpus);

        // Cached results may no longer reflect the corpus
        self.query_cache.clear();

        tracing::debug!(id = %id, "knowledge entry added");
        Ok(id)
    }

    /// Append one vector to the index, rebuilding on the flat-to-clustered
    /// threshold crossing. Caller holds the corpus write lock.
    async fn index_new_entry(
        &self,
        corpus: &mut Corpus,
        id: String,
        vector: Vec<f32>,
    ) -> Result<()> {
        let flat_threshold = self.config.index.flat_threshold;
        let nprobe = self.config.index.nprobe;

        let crosses_threshold = match &corpus.index {
            Some(VectorIndex::Flat(_)) => corpus.indexed_entries() + 1 >= flat_threshold,
            _ => false,
        };

        if crosses_threshold {
            let mut vectors: Vec<Vec<f32>> = corpus
                .slots
                .iter()
                .filter_map(|slot_id| corpus.entries.get(slot_id))
                .filter_map(|e| e.embedding.clone())
                .collect();
            vectors.push(vector);

            let dim = self.dim;
            let rebuilt = tokio::task::spawn_blocking(move || {
                VectorIndex::build(vectors, dim, flat_threshold, nprobe)
            })
            .await??;
            tracing::info!(
                indexed = rebuilt.len(),
                kind = rebuilt.kind(),
                "vector index rebuilt"
            );
            corpus.index = Some(rebuilt);
            corpus.slots.push(id);
            return Ok(());
        }

        match &mut corpus.index {
            Some(index) => {
                index.add(vector)?;
            }
            None => {
                corpus.index = Some(VectorIndex::build(
                    vec![vector],
                    self.dim,
                    flat_threshold,
                    nprobe,
                )?);
            }
        }
        corpus.slots.push(id);
        Ok(())
    }

    /// Retrieve the best responses for a query.
    ///
    /// Pipeline: result cache (when `use_cache`), semantic search bounded
    /// by the configured deadline, then lexical fallback. Results are
    /// deduplicated by source entry and by response text, capped at
    /// `top_k`, and cached when non-empty.
    pub async fn search_knowledge(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
        use_cache: bool,
    ) -> Result<Vec<QueryResult>> {
        let started = Instant::now();
        let normalized = query.trim().to_lowercase();

        if normalized.is_empty() || top_k == 0 {
            self.stats.record_query(RetrievalPath::Empty, started.elapsed());
            return Ok(Vec::new());
        }

        let cache_key = Self::query_cache_key(&normalized, top_k, filters);

        if use_cache {
            if let Some(mut results) = self.query_cache.get(&cache_key) {
                let elapsed = started.elapsed();
                for result in &mut results {
                    result.cache_hit = true;
                    result.processing_time = elapsed.as_secs_f64();
                }
                self.stats.record_query(RetrievalPath::Cache, elapsed);
                return Ok(results);
            }
        }

        let deadline = Duration::from_millis(self.config.search.timeout_ms);
        let mut path = RetrievalPath::Semantic;
        let mut results = match tokio::time::timeout(
            deadline,
            self.semantic_search(&normalized, top_k, filters),
        )
        .await
        {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "semantic search failed, falling back to lexical");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.search.timeout_ms,
                    "semantic search timed out, falling back to lexical"
                );
                Vec::new()
            }
        };

        if results.is_empty() {
            path = RetrievalPath::Lexical;
            results = self.lexical_search(&normalized, top_k, filters).await?;
        }

        if results.is_empty() {
            path = RetrievalPath::Empty;
        } else {
            self.record_accesses(&results).await;
            if use_cache {
                self.query_cache.put(cache_key, results.clone());
            }
        }

        let elapsed = started.elapsed();
        for result in &mut results {
            result.processing_time = elapsed.as_secs_f64();
        }
        self.stats.record_query(path, elapsed);

        Ok(results)
    }

    async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<QueryResult>> {
        let query_vector = self.pipeline.embed(query).await?;

        let corpus = self.corpus.read().await;
        let index = match &corpus.index {
            Some(index) => index,
            None => return Ok(Vec::new()),
        };

        let fetch = top_k.saturating_mul(self.config.search.overfetch_factor.max(1));
        let hits = index.search(&query_vector, fetch);
        self.stats.record_index_search();

        let threshold = self.config.search.similarity_threshold;
        let mut seen_ids = HashSet::new();
        let mut seen_texts = HashSet::new();
        let mut results = Vec::new();

        for (slot, score) in hits {
            if score < threshold {
                continue;
            }
            let Some(id) = corpus.slots.get(slot) else {
                continue;
            };
            let Some(entry) = corpus.entries.get(id) else {
                continue;
            };
            if !filters.matches(entry) {
                continue;
            }
            if !seen_ids.insert(entry.id.clone())
                || !seen_texts.insert(entry.response_text.clone())
            {
                continue;
            }

            results.push(QueryResult {
                text: entry.response_text.clone(),
                confidence: score.clamp(0.0, 1.0),
                source_id: entry.id.clone(),
                metadata: entry.metadata.clone(),
                processing_time: 0.0,
                cache_hit: false,
            });
            if results.len() == top_k {
                break;
            }
        }

        Ok(results)
    }

    async fn lexical_search(
        &self,
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<QueryResult>> {
        let fetch = top_k.saturating_mul(self.config.search.overfetch_factor.max(1));
        let scored = self.store.lexical_search(query, fetch, filters).await?;
        self.stats.record_store_search();

        let threshold = self.config.search.similarity_threshold;
        let mut seen_texts = HashSet::new();
        let mut results = Vec::new();

        for (entry, score) in scored {
            if score < threshold {
                continue;
            }
            if !seen_texts.insert(entry.response_text.clone()) {
                continue;
            }

            results.push(QueryResult {
                text: entry.response_text.clone(),
                confidence: score.clamp(0.0, 1.0),
                source_id: entry.id.clone(),
                metadata: entry.metadata.clone(),
                processing_time: 0.0,
                cache_hit: false,
            });
            if results.len() == top_k {
                break;
            }
        }

        Ok(results)
    }

    /// Bump access counters for served entries, in memory first and then
    /// durably. A failed durable update is logged and absorbed.
    async fn record_accesses(&self, results: &[QueryResult]) {
        let mut updated = Vec::with_capacity(results.len());

        {
            let mut corpus = self.corpus.write().await;
            for result in results {
                if let Some(entry) = corpus.entries.get_mut(&result.source_id) {
                    entry.record_access();
                    updated.push(entry.clone());
                }
            }
        }

        for entry in updated {
            if let Err(e) = self.store.upsert(&entry).await {
                tracing::warn!(id = %entry.id, error = %e, "failed to persist access count");
            }
        }
    }

    /// Get an entry by id from the working set.
    pub async fn get_knowledge(&self, id: &str) -> Option<KnowledgeEntry> {
        self.corpus.read().await.entries.get(id).cloned()
    }

    pub async fn entry_count(&self) -> usize {
        self.corpus.read().await.entries.len()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            query_cache: CacheInfo {
                size: self.query_cache.len(),
                capacity: self.query_cache.capacity(),
                ttl_secs: self.query_cache.ttl().as_secs(),
            },
            embedding_cache: CacheInfo {
                size: self.pipeline.cache_len(),
                capacity: self.pipeline.cache_capacity(),
                ttl_secs: self.pipeline.cache_ttl().as_secs(),
            },
            cache_hit_rate: self.stats.cache_hit_rate(),
        }
    }

    pub async fn get_performance_stats(&self) -> PerformanceStats {
        let corpus = self.corpus.read().await;
        PerformanceStats {
            queries: self.stats.snapshot(),
            total_entries: corpus.entries.len(),
            indexed_entries: corpus.indexed_entries(),
            index_kind: corpus.index.as_ref().map(|i| i.kind().to_string()),
            embedding_model: self.pipeline.model_id().to_string(),
            similarity_threshold: self.config.search.similarity_threshold,
        }
    }

    /// Drop both cache tiers. The working set and the durable store are
    /// untouched.
    pub fn cleanup(&self) {
        self.query_cache.clear();
        self.pipeline.clear_cache();
        tracing::info!("caches cleared");
    }

    fn query_cache_key(normalized_query: &str, top_k: usize, filters: &SearchFilters) -> String {
        let filters_json = serde_json::to_string(filters).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(normalized_query.as_bytes());
        hasher.update(b"|");
        hasher.update(top_k.to_be_bytes());
        hasher.update(b"|");
        hasher.update(filters_json.as_bytes());
        hex::encode(hasher.finalize())
    }
}
