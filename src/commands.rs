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
use colored::Colorize;
use std::collections::HashMap;

use crate::cli::Commands;
use crate::config::Config;
use crate::embedding::create_embedding_provider;
use crate::knowledge::{formatting, RetrievalEngine, SearchFilters};

pub async fn execute(config: &Config, command: Commands) -> Result<()> {
    let provider = create_embedding_provider(&config.embedding).await?;
    let engine = RetrievalEngine::new(config.clone(), provider).await?;
    engine.load().await?;

    match command {
        Commands::Add {
            input,
            response,
            domain,
            category,
            importance,
        } => {
            let mut metadata = HashMap::new();
            if let Some(domain) = domain {
                metadata.insert("domain".to_string(), serde_json::Value::String(domain));
            }
            if let Some(category) = category {
                metadata.insert("category".to_string(), serde_json::Value::String(category));
            }

            let id = engine
                .add_knowledge(&input, &response, metadata, importance)
                .await?;
            println!("Stored {}", id.green());
        }

        Commands::Search {
            query,
            top_k,
            domain,
            category,
            min_importance,
            no_cache,
            format,
        } => {
            let filters = SearchFilters {
                domain,
                category,
                min_importance,
                ..Default::default()
            };

            let results = engine
                .search_knowledge(&query, top_k, &filters, !no_cache)
                .await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&results)?),
                _ => println!("{}", formatting::format_search_results(&results)),
            }
        }

        Commands::Get { id, format } => match engine.get_knowledge(&id).await {
            Some(entry) => match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&entry)?),
                _ => println!("{}", formatting::format_entry(&entry)),
            },
            None => println!("No entry with id {}", id),
        },

        Commands::Stats { format } => {
            let perf = engine.get_performance_stats().await;
            let caches = engine.get_cache_stats();

            match format.as_str() {
                "json" => {
                    let combined = serde_json::json!({
                        "performance": perf,
                        "caches": caches,
                    });
                    println!("{}", serde_json::to_string_pretty(&combined)?);
                }
                _ => println!("{}", formatting::format_stats(&perf, &caches)),
            }
        }

        Commands::Cleanup => {
            engine.cleanup();
            println!("Caches cleared");
        }
    }

    Ok(())
}
