use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Canonical stored unit: a (question, response) pair with ranking
/// metadata and a lazily computed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique identifier, stable for the entry's lifetime
    pub id: String,
    pub input_text: String,
    pub response_text: String,
    /// Open pass-through metadata (e.g. domain tags)
    pub metadata: HashMap<String, serde_json::Value>,
    /// Ranking tie-break weight; typically in [0, ~2]
    pub importance_score: f32,
    /// Incremented on every retrieval that returns this entry
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Monotone insertion sequence; earlier entries win ranking ties
    pub seq: u64,
    /// Absent until the embedding pipeline has processed the entry;
    /// such entries participate only in lexical search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeEntry {
    /// Create a new entry. The id is derived from content, time, and the
    /// insertion sequence, so identical additions stay distinguishable
    /// even within the same millisecond.
    pub fn new(
        input_text: String,
        response_text: String,
        metadata: HashMap<String, serde_json::Value>,
        importance_score: f32,
        seq: u64,
    ) -> Self {
        let now = Utc::now();
        let id = Self::derive_id(&input_text, now, seq);

        Self {
            id,
            input_text,
            response_text,
            metadata,
            importance_score,
            access_count: 0,
            last_accessed: None,
            created_at: now,
            seq,
            embedding: None,
        }
    }

    fn derive_id(input_text: &str, created_at: DateTime<Utc>, seq: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input_text.as_bytes());
        hasher.update(b":");
        hasher.update(seq.to_be_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("kb_{}_{}", created_at.timestamp_millis(), &digest[..12])
    }

    /// Record a retrieval that returned this entry.
    pub fn record_access(&mut self) {
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
    }
}

/// Ephemeral search result returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// The matched entry's response text
    pub text: String,
    /// Normalized match score in [0, 1], comparable across retrieval paths
    pub confidence: f32,
    /// Id of the originating entry
    pub source_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Wall-clock seconds spent serving the query
    pub processing_time: f64,
    /// Set only when served from the result cache
    pub cache_hit: bool,
}

/// Conjunctive metadata filters. Recognized keys are explicit fields;
/// `extra` carries exact-match predicates over other metadata keys. An
/// entry missing a filtered field fails that filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub domain: Option<String>,
    pub category: Option<String>,
    pub min_importance: Option<f32>,
    /// Exact-match predicates over arbitrary metadata keys; ordered map
    /// so the cache key serialization is stable
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.domain.is_none()
            && self.category.is_none()
            && self.min_importance.is_none()
            && self.extra.is_empty()
    }

    /// Whether an entry passes every filter.
    pub fn matches(&self, entry: &KnowledgeEntry) -> bool {
        if let Some(ref domain) = self.domain {
            if !metadata_eq(&entry.metadata, "domain", domain) {
                return false;
            }
        }

        if let Some(ref category) = self.category {
            if !metadata_eq(&entry.metadata, "category", category) {
                return false;
            }
        }

        if let Some(min_importance) = self.min_importance {
            if entry.importance_score < min_importance {
                return false;
            }
        }

        for (key, expected) in &self.extra {
            if !metadata_eq(&entry.metadata, key, expected) {
                return false;
            }
        }

        true
    }
}

fn metadata_eq(
    metadata: &HashMap<String, serde_json::Value>,
    key: &str,
    expected: &str,
) -> bool {
    match metadata.get(key) {
        Some(serde_json::Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

/// Snapshot of one cache instance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub size: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
}

/// Snapshot of both cache tiers plus the observed hit rate.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub query_cache: CacheInfo,
    pub embedding_cache: CacheInfo,
    pub cache_hit_rate: f64,
}

/// Comprehensive performance view: query counters plus corpus state.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub queries: crate::stats::QueryStats,
    pub total_entries: usize,
    pub indexed_entries: usize,
    /// "flat", "ivf_flat", or absent when no index is built
    pub index_kind: Option<String>,
    pub embedding_model: String,
    pub similarity_threshold: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_metadata(metadata: HashMap<String, serde_json::Value>) -> KnowledgeEntry {
        let mut entry = KnowledgeEntry::new(
            "input".to_string(),
            "response".to_string(),
            metadata,
            1.0,
            0,
        );
        entry.importance_score = 1.0;
        entry
    }

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_ids_distinct_for_identical_content() {
        let a = KnowledgeEntry::new("same".into(), "same".into(), HashMap::new(), 1.0, 0);
        let b = KnowledgeEntry::new("same".into(), "same".into(), HashMap::new(), 1.0, 1);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("kb_"));
    }

    #[test]
    fn test_record_access() {
        let mut entry = entry_with_metadata(HashMap::new());
        assert_eq!(entry.access_count, 0);
        assert!(entry.last_accessed.is_none());

        entry.record_access();
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed.is_some());
    }

    #[test]
    fn test_domain_filter() {
        let entry = entry_with_metadata(metadata(&[("domain", "electrical")]));

        let matching = SearchFilters {
            domain: Some("electrical".to_string()),
            ..Default::default()
        };
        let wrong = SearchFilters {
            domain: Some("plumbing".to_string()),
            ..Default::default()
        };

        assert!(matching.matches(&entry));
        assert!(!wrong.matches(&entry));
    }

    #[test]
    fn test_missing_field_fails_filter() {
        let entry = entry_with_metadata(HashMap::new());
        let filters = SearchFilters {
            domain: Some("electrical".to_string()),
            ..Default::default()
        };
        assert!(!filters.matches(&entry));
    }

    #[test]
    fn test_unknown_extra_key_fails_filter() {
        let entry = entry_with_metadata(metadata(&[("domain", "electrical")]));
        let mut filters = SearchFilters::default();
        filters
            .extra
            .insert("no_such_field".to_string(), "x".to_string());
        assert!(!filters.matches(&entry));
    }

    #[test]
    fn test_min_importance_filter() {
        let mut entry = entry_with_metadata(HashMap::new());
        entry.importance_score = 0.4;

        let filters = SearchFilters {
            min_importance: Some(0.5),
            ..Default::default()
        };
        assert!(!filters.matches(&entry));

        entry.importance_score = 0.6;
        assert!(filters.matches(&entry));
    }

    #[test]
    fn test_conjunctive_filters() {
        let entry = entry_with_metadata(metadata(&[
            ("domain", "electrical"),
            ("category", "pricing"),
        ]));

        let filters = SearchFilters {
            domain: Some("electrical".to_string()),
            category: Some("pricing".to_string()),
            ..Default::default()
        };
        assert!(filters.matches(&entry));

        let filters = SearchFilters {
            domain: Some("electrical".to_string()),
            category: Some("safety".to_string()),
            ..Default::default()
        };
        assert!(!filters.matches(&entry));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let entry = entry_with_metadata(HashMap::new());
        assert!(SearchFilters::default().matches(&entry));
        assert!(SearchFilters::default().is_empty());
    }
}
