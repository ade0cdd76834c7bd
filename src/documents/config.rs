//! Configuration types for chunking and collection naming.

use serde::{Deserialize, Serialize};

/// Configuration for the fixed-size fallback splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between adjacent windows.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// How far back from the window end to look for a sentence boundary.
    #[serde(default = "default_boundary_lookback")]
    pub boundary_lookback: usize,
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_boundary_lookback() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            boundary_lookback: default_boundary_lookback(),
        }
    }
}

impl ChunkingConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }

        Ok(())
    }
}

/// Names of the four persisted collections.
///
/// Each name is also the directory the collection lives in under the index path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionsConfig {
    /// Page-oriented documents (single-stage layout).
    #[serde(default = "default_paged")]
    pub paged: String,

    /// Row-oriented documents (single-stage layout).
    #[serde(default = "default_tabular")]
    pub tabular: String,

    /// Coarse units (cascaded layout).
    #[serde(default = "default_units")]
    pub units: String,

    /// Fine fragments scoped by unit (cascaded layout).
    #[serde(default = "default_fragments")]
    pub fragments: String,
}

fn default_paged() -> String {
    "pdf_documents".to_string()
}

fn default_tabular() -> String {
    "csv_documents".to_string()
}

fn default_units() -> String {
    "case_units".to_string()
}

fn default_fragments() -> String {
    "case_fragments".to_string()
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            paged: default_paged(),
            tabular: default_tabular(),
            units: default_units(),
            fragments: default_fragments(),
        }
    }
}

impl CollectionsConfig {
    pub fn validate(&self) -> Result<(), String> {
        let names = [&self.paged, &self.tabular, &self.units, &self.fragments];
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err("collection names must not be empty".to_string());
            }
            if names[i + 1..].contains(name) {
                return Err(format!("collection name '{name}' is used twice"));
            }
        }
        Ok(())
    }
}
