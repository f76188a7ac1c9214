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

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::EmbeddingConfig;

/// Black-box embedding model: text in, fixed-dimension vectors out.
/// Deterministic for identical input and model id.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier that distinguishes vectors from different models
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embedding, preserving input order and length.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Registry-backed provider resolved from a `provider:model` string.
struct RegistryProvider {
    model: String,
    inner: Box<dyn octolib::embedding::provider::EmbeddingProvider>,
}

#[async_trait]
impl EmbeddingProvider for RegistryProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.generate_embedding(text).await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.inner
            .generate_embeddings_batch(texts, octolib::embedding::types::InputType::None)
            .await
    }
}

/// Create embedding provider from config
pub async fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let (provider, model) = octolib::embedding::parse_provider_model(&config.model)?;
    let inner =
        octolib::embedding::provider::create_embedding_provider_from_parts(&provider, &model)
            .await?;

    Ok(Arc::new(RegistryProvider {
        model: config.model.clone(),
        inner,
    }))
}

/// Batch embedding front end with a write-through TTL cache.
///
/// Texts already cached for the current model skip the provider; misses
/// are sent in batched calls and written back before results are merged
/// in input order. A provider failure fails the whole call, no partial
/// results.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    cache: TtlCache<String, Vec<f32>>,
    batch_size: usize,
}

impl EmbeddingPipeline {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            cache: TtlCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        match vectors.pop() {
            Some(v) => Ok(v),
            None => bail!("embedding provider returned an empty batch"),
        }
    }

    /// Embed a batch of texts, preserving input order and length.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&self.cache_key(text)) {
                Some(vector) => slots[i] = Some(vector),
                None => misses.push((i, text.clone())),
            }
        }

        if !misses.is_empty() {
            tracing::debug!(
                total = texts.len(),
                misses = misses.len(),
                "embedding batch: computing uncached vectors"
            );
        }

        for chunk in misses.chunks(self.batch_size) {
            let batch: Vec<String> = chunk.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.provider.embed_batch(batch).await?;

            if vectors.len() != chunk.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                );
            }

            for ((i, text), vector) in chunk.iter().zip(vectors.into_iter()) {
                self.cache.put(self.cache_key(text), vector.clone());
                slots[*i] = Some(vector);
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| anyhow::anyhow!("missing embedding in batch result")))
            .collect()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Cache key over (model id, text) so model changes never alias.
    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.model_id().as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}
