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

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod index;
pub mod knowledge;
pub mod stats;
pub mod storage;

pub use config::Config;
pub use embedding::{create_embedding_provider, EmbeddingPipeline, EmbeddingProvider};
pub use knowledge::{
    CacheStats, KnowledgeEntry, PerformanceStats, QueryResult, RetrievalEngine, SearchFilters,
};
