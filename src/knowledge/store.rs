use anyhow::{Context, Result};
use arrow::buffer::NullBuffer;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    connect,
    query::{ExecutableQuery, QueryBase},
    Connection,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::knowledge::types::{KnowledgeEntry, SearchFilters};

const ENTRIES_TABLE: &str = "entries";

/// Fixed stop-word set dropped from lexical queries.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "it",
];

/// Durable store for knowledge entries with lexical search.
///
/// Vector search lives in the in-memory index; the store owns the
/// persistent record and the term-overlap ranking used by the lexical
/// fallback path.
pub struct KnowledgeStore {
    db: Connection,
    vector_dim: usize,
}

impl KnowledgeStore {
    fn quote_filter_string(input: &str) -> String {
        input.replace('\'', "''")
    }

    pub async fn new(db_path: &Path, vector_dim: usize) -> Result<Self> {
        std::fs::create_dir_all(db_path)?;

        let path = db_path
            .to_str()
            .context("database path is not valid UTF-8")?;
        let db = connect(path).execute().await?;

        let store = Self { db, vector_dim };
        store.initialize_table().await?;

        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("input_text", DataType::Utf8, false),
            Field::new("response_text", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false), // JSON serialized
            Field::new("importance_score", DataType::Float32, false),
            Field::new("access_count", DataType::Int64, false),
            Field::new("last_accessed", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, false),
            Field::new("seq", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector_dim as i32,
                ),
                true,
            ),
        ]))
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self.db.table_names().execute().await?;

        if !table_names.contains(&ENTRIES_TABLE.to_string()) {
            self.db
                .create_empty_table(ENTRIES_TABLE, self.schema())
                .execute()
                .await?;
        }

        Ok(())
    }

    fn entry_to_batch(&self, entry: &KnowledgeEntry) -> Result<RecordBatch> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let last_accessed = entry.last_accessed.map(|t| t.to_rfc3339());

        let embedding_values = match &entry.embedding {
            Some(v) => {
                anyhow::ensure!(
                    v.len() == self.vector_dim,
                    "embedding dimension mismatch: expected {}, got {}",
                    self.vector_dim,
                    v.len()
                );
                v.clone()
            }
            None => vec![0.0; self.vector_dim],
        };
        let embedding_array = FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.vector_dim as i32,
            Arc::new(Float32Array::from(embedding_values)),
            Some(NullBuffer::from(vec![entry.embedding.is_some()])),
        );

        let batch = RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(vec![entry.id.clone()])),
                Arc::new(StringArray::from(vec![entry.input_text.clone()])),
                Arc::new(StringArray::from(vec![entry.response_text.clone()])),
                Arc::new(StringArray::from(vec![metadata_json])),
                Arc::new(Float32Array::from(vec![entry.importance_score])),
                Arc::new(Int64Array::from(vec![entry.access_count as i64])),
                Arc::new(StringArray::from(vec![last_accessed])),
                Arc::new(StringArray::from(vec![entry.created_at.to_rfc3339()])),
                Arc::new(Int64Array::from(vec![entry.seq as i64])),
                Arc::new(embedding_array),
            ],
        )?;

        Ok(batch)
    }

    /// Durably append a new entry. The entry is visible to readers only
    /// after this returns Ok.
    pub async fn add(&self, entry: &KnowledgeEntry) -> Result<()> {
        let batch = self.entry_to_batch(entry)?;
        let table = self.db.open_table(ENTRIES_TABLE).execute().await?;

        use arrow::record_batch::RecordBatchIterator;
        use std::iter::once;
        let schema = batch.schema();
        let batches = once(Ok(batch));
        let batch_reader = RecordBatchIterator::new(batches, schema);
        table.add(batch_reader).execute().await?;

        Ok(())
    }

    /// Replace an existing entry by id (delete + re-add), used to persist
    /// access-counter updates. Deleting a nonexistent id is not an error,
    /// but a failed delete is, so a stale row never coexists with its
    /// replacement.
    pub async fn upsert(&self, entry: &KnowledgeEntry) -> Result<()> {
        let table = self.db.open_table(ENTRIES_TABLE).execute().await?;
        table
            .delete(&format!("id = '{}'", Self::quote_filter_string(&entry.id)))
            .await?;

        self.add(entry).await
    }

    /// Get an entry by id.
    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let table = self.db.open_table(ENTRIES_TABLE).execute().await?;

        let mut results = table
            .query()
            .only_if(format!("id = '{}'", Self::quote_filter_string(id)))
            .limit(1)
            .execute()
            .await?;

        while let Some(batch) = results.try_next().await? {
            if batch.num_rows() > 0 {
                let entries = self.batch_to_entries(&batch)?;
                return Ok(entries.into_iter().next());
            }
        }

        Ok(None)
    }

    /// Load every entry, ordered by insertion sequence.
    pub async fn load_all(&self) -> Result<Vec<KnowledgeEntry>> {
        let table = self.db.open_table(ENTRIES_TABLE).execute().await?;
        let mut results = table.query().execute().await?;

        let mut entries = Vec::new();
        while let Some(batch) = results.try_next().await? {
            if batch.num_rows() == 0 {
                continue;
            }
            entries.extend(self.batch_to_entries(&batch)?);
        }

        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(ENTRIES_TABLE).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    /// Term-overlap search over `input_text`. Candidates sharing no
    /// significant term with the query score zero and are dropped; the
    /// rest rank by overlap, then importance, then access count, ties
    /// broken by insertion order.
    pub async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(KnowledgeEntry, f32)>> {
        let query_terms = Self::significant_terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.load_all().await?;
        let mut scored: Vec<(KnowledgeEntry, f32)> = Vec::new();

        for entry in entries {
            if !filters.matches(&entry) {
                continue;
            }

            let score = Self::term_overlap(&query_terms, &entry.input_text);
            if score > 0.0 {
                scored.push((entry, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.0.importance_score
                        .partial_cmp(&a.0.importance_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.0.access_count.cmp(&a.0.access_count))
                .then(a.0.seq.cmp(&b.0.seq))
        });
        scored.truncate(limit);

        Ok(scored)
    }

    // ===== Lexical scoring helpers =====

    /// Tokenize text into lowercase words, removing punctuation
    pub(crate) fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    /// Token set with stop words removed.
    pub(crate) fn significant_terms(text: &str) -> HashSet<String> {
        Self::tokenize(text)
            .into_iter()
            .filter(|t| !STOP_WORDS.contains(&t.as_str()))
            .collect()
    }

    /// Jaccard overlap between the query terms and a candidate text, in
    /// [0, 1]; 1.0 means identical significant-term sets.
    pub(crate) fn term_overlap(query_terms: &HashSet<String>, text: &str) -> f32 {
        let text_terms = Self::significant_terms(text);
        if query_terms.is_empty() || text_terms.is_empty() {
            return 0.0;
        }

        let intersection = query_terms.intersection(&text_terms).count();
        let union = query_terms.union(&text_terms).count();
        intersection as f32 / union as f32
    }

    /// Convert RecordBatch to Vec<KnowledgeEntry>
    fn batch_to_entries(&self, batch: &RecordBatch) -> Result<Vec<KnowledgeEntry>> {
        let num_rows = batch.num_rows();
        let mut entries = Vec::with_capacity(num_rows);

        let id_array = batch
            .column_by_name("id")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("id column not found or wrong type"))?;

        let input_array = batch
            .column_by_name("input_text")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("input_text column not found or wrong type"))?;

        let response_array = batch
            .column_by_name("response_text")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("response_text column not found or wrong type"))?;

        let metadata_array = batch
            .column_by_name("metadata")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("metadata column not found or wrong type"))?;

        let importance_array = batch
            .column_by_name("importance_score")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("importance_score column not found or wrong type"))?;

        let access_array = batch
            .column_by_name("access_count")
            .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| anyhow::anyhow!("access_count column not found or wrong type"))?;

        let last_accessed_array = batch
            .column_by_name("last_accessed")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("last_accessed column not found or wrong type"))?;

        let created_array = batch
            .column_by_name("created_at")
            .and_then(|col| col.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("created_at column not found or wrong type"))?;

        let seq_array = batch
            .column_by_name("seq")
            .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| anyhow::anyhow!("seq column not found or wrong type"))?;

        let embedding_array = batch
            .column_by_name("embedding")
            .and_then(|col| col.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| anyhow::anyhow!("embedding column not found or wrong type"))?;

        for i in 0..num_rows {
            let metadata = serde_json::from_str(metadata_array.value(i)).unwrap_or_default();

            let last_accessed = if last_accessed_array.is_null(i) {
                None
            } else {
                Some(
                    DateTime::parse_from_rfc3339(last_accessed_array.value(i))?
                        .with_timezone(&Utc),
                )
            };

            let embedding = if embedding_array.is_null(i) {
                None
            } else {
                let values = embedding_array.value(i);
                let floats = values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .ok_or_else(|| anyhow::anyhow!("embedding items have wrong type"))?;
                Some((0..floats.len()).map(|j| floats.value(j)).collect())
            };

            entries.push(KnowledgeEntry {
                id: id_array.value(i).to_string(),
                input_text: input_array.value(i).to_string(),
                response_text: response_array.value(i).to_string(),
                metadata,
                importance_score: importance_array.value(i),
                access_count: access_array.value(i) as u64,
                last_accessed,
                created_at: DateTime::parse_from_rfc3339(created_array.value(i))?
                    .with_timezone(&Utc),
                seq: seq_array.value(i) as u64,
                embedding,
            });
        }

        Ok(entries)
    }
}
