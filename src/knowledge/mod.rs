pub mod engine;
pub mod formatting;
pub mod store;
pub mod types;

pub use engine::RetrievalEngine;
pub use store::KnowledgeStore;
pub use types::{
    CacheInfo, CacheStats, KnowledgeEntry, PerformanceStats, QueryResult, SearchFilters,
};

#[cfg(test)]
mod engine_tests;
