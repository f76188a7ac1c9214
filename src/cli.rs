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

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "recalldb")]
#[command(version)]
#[command(about = "Hybrid knowledge retrieval engine with semantic and lexical search", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a knowledge entry (an input paired with its response)
    Add {
        /// The input text the entry answers, e.g. a question
        #[arg(short, long)]
        input: String,

        /// The response to return when the entry matches
        #[arg(short, long)]
        response: String,

        /// Domain tag stored in the entry metadata
        #[arg(short, long)]
        domain: Option<String>,

        /// Category tag stored in the entry metadata
        #[arg(short, long)]
        category: Option<String>,

        /// Ranking weight used to break ties between matches
        #[arg(long, default_value = "1.0")]
        importance: f32,
    },

    /// Retrieve the best-matching responses for a query
    Search {
        /// The query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Only match entries tagged with this domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Only match entries tagged with this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only match entries at or above this importance
        #[arg(long)]
        min_importance: Option<f32>,

        /// Bypass the query result cache
        #[arg(long)]
        no_cache: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Get a knowledge entry by id
    Get {
        /// Entry id, as returned by add or search
        id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show retrieval and cache statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Clear the query and embedding caches
    Cleanup,
}
