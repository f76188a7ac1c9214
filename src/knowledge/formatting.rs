use colored::Colorize;

use crate::knowledge::types::{CacheStats, KnowledgeEntry, PerformanceStats, QueryResult};

pub fn format_search_results(results: &[QueryResult]) -> String {
    if results.is_empty() {
        return "No results found".to_string();
    }

    let mut output = String::new();

    for result in results {
        output.push_str(&"━".repeat(60));
        output.push('\n');

        output.push_str(&result.text);
        output.push('\n');

        let score_pct = (result.confidence * 100.0) as u32;
        let mut tags = format!("{}% match", score_pct).green().to_string();
        if result.cache_hit {
            tags.push_str(&format!("  {}", "cached".cyan()));
        }
        output.push_str(&tags);
        output.push('\n');

        output.push_str(&result.source_id.bright_black().to_string());
        output.push_str("\n\n");
    }

    output
}

pub fn format_entry(entry: &KnowledgeEntry) -> String {
    let mut output = String::new();

    output.push_str(&entry.id.blue().bold().to_string());
    output.push('\n');
    output.push_str(&format!("Input: {}\n", entry.input_text));
    output.push_str(&format!("Response: {}\n", entry.response_text));
    output.push_str(&format!("Importance: {:.2}\n", entry.importance_score));
    output.push_str(&format!("Accessed: {} times\n", entry.access_count));
    output.push_str(&format!("Created: {}\n", entry.created_at.to_rfc3339()));

    if !entry.metadata.is_empty() {
        let mut keys: Vec<&String> = entry.metadata.keys().collect();
        keys.sort();
        for key in keys {
            output.push_str(
                &format!("  {}: {}\n", key, entry.metadata[key])
                    .bright_black()
                    .to_string(),
            );
        }
    }

    output
}

pub fn format_stats(perf: &PerformanceStats, caches: &CacheStats) -> String {
    let mut output = String::new();

    output.push_str(&"Knowledge Base".bold().to_string());
    output.push('\n');
    output.push_str(&format!("Total Entries: {}\n", perf.total_entries));
    output.push_str(&format!("Indexed Entries: {}\n", perf.indexed_entries));
    output.push_str(&format!(
        "Index: {}\n",
        perf.index_kind.as_deref().unwrap_or("none")
    ));
    output.push_str(&format!("Embedding Model: {}\n", perf.embedding_model));
    output.push_str(&format!(
        "Similarity Threshold: {:.2}\n",
        perf.similarity_threshold
    ));

    output.push('\n');
    output.push_str(&"Queries".bold().to_string());
    output.push('\n');
    output.push_str(&format!("Total: {}\n", perf.queries.total_queries));
    output.push_str(&format!(
        "Cache Hit Rate: {:.1}%\n",
        perf.queries.cache_hit_rate * 100.0
    ));
    output.push_str(&format!("Semantic: {}\n", perf.queries.semantic_served));
    output.push_str(&format!("Lexical: {}\n", perf.queries.lexical_served));
    output.push_str(&format!("Empty: {}\n", perf.queries.empty_results));
    output.push_str(&format!(
        "Avg Latency: {:.2} ms\n",
        perf.queries.avg_query_time_ms
    ));

    output.push('\n');
    output.push_str(&"Caches".bold().to_string());
    output.push('\n');
    output.push_str(&format!(
        "Query Cache: {}/{} entries, {}s TTL\n",
        caches.query_cache.size, caches.query_cache.capacity, caches.query_cache.ttl_secs
    ));
    output.push_str(&format!(
        "Embedding Cache: {}/{} entries, {}s TTL\n",
        caches.embedding_cache.size, caches.embedding_cache.capacity, caches.embedding_cache.ttl_secs
    ));

    output
}
