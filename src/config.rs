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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider and model in `provider:model` form
    pub model: String,
    /// Maximum texts per provider call
    pub batch_size: usize,
    /// Vector dimension assumed when the provider cannot be probed
    pub fallback_dimension: usize,
    /// Embedding cache capacity (text -> vector)
    pub cache_capacity: usize,
    /// Embedding cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "voyage:voyage-3.5-lite".to_string(),
            batch_size: 32,
            fallback_dimension: 384,
            cache_capacity: 2000,
            cache_ttl_secs: 1200,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum similarity for a result to be returned, either retrieval path
    pub similarity_threshold: f32,
    /// Candidate over-fetch multiplier applied to `top_k` before
    /// filtering and deduplication
    pub overfetch_factor: usize,
    /// Overall per-query deadline; semantic search past it falls back to
    /// lexical search
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            overfetch_factor: 2,
            timeout_ms: 5000,
        }
    }
}

/// Query result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 300,
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Corpus size at which the index switches from exact flat search to
    /// the clustered topology
    pub flat_threshold: usize,
    /// Partitions probed per search on the clustered topology
    pub nprobe: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            flat_threshold: 1000,
            nprobe: 8,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
}

/// Main configuration for recalldb
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub index: IndexConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from config.toml file
    /// First tries to load from system config directory, falls back to embedded template
    pub fn load() -> Result<Self> {
        let config_path = crate::storage::get_system_config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Config doesn't exist, create from template
            let template_content = include_str!("../config-templates/default.toml");
            let config: Self = toml::from_str(template_content)?;

            if let Some(parent) = config_path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&config_path, template_content)?;

            Ok(config)
        }
    }

    /// Resolve the database directory, falling back to the platform data dir.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => crate::storage::get_database_path(),
        }
    }
}
