use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;

/// A cleaned text segment and where it came from.
///
/// The row order of a chunk sequence is the identity key shared by the
/// embedding matrix, the metadata file and the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub position: usize,
    pub text: String,
}

/// Dense row-major `f32` matrix, one row per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dimensions: usize,
    values: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn from_flat(rows: usize, dimensions: usize, values: Vec<f32>) -> Result<Self, StoreError> {
        if dimensions == 0 {
            return Err(StoreError::DataIntegrity(
                "embedding dimension must be non-zero".to_string(),
            ));
        }
        if rows.checked_mul(dimensions) != Some(values.len()) {
            return Err(StoreError::DataIntegrity(format!(
                "{} values cannot form a {}x{} matrix",
                values.len(),
                rows,
                dimensions
            )));
        }
        Ok(Self {
            rows,
            dimensions,
            values,
        })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, StoreError> {
        let dimensions = rows.first().map(Vec::len).unwrap_or_default();
        let count = rows.len();
        let mut values = Vec::with_capacity(count * dimensions);
        for (position, row) in rows.into_iter().enumerate() {
            if row.len() != dimensions {
                return Err(StoreError::DataIntegrity(format!(
                    "row {position} has {} values, expected {dimensions}",
                    row.len()
                )));
            }
            values.extend(row);
        }
        Self::from_flat(count, dimensions, values)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimensions)?;
        self.values.get(start..start + self.dimensions)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks_exact(self.dimensions)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Normalizes every row to unit length in place. Zero rows are left alone.
    pub fn normalize_rows(&mut self) {
        for row in self.values.chunks_exact_mut(self.dimensions) {
            l2_normalize(row);
        }
    }
}

/// Scales `vector` to unit length. Returns `false` for zero vectors.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
        true
    } else {
        false
    }
}

/// One ranked row returned by the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f32,
    pub row: usize,
}

/// One ranked chunk text handed to the answer layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub rank: usize,
    pub score: f32,
    pub text: String,
}

/// Written next to the store artifacts; ties the three stores to one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusManifest {
    pub format_version: u32,
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub rows: usize,
    pub dimensions: usize,
    pub embeddings_sha256: String,
    pub metadata_sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub normalize: bool,
    pub batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            batch_size: 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub store_dir: PathBuf,
    pub index_path: PathBuf,
    pub chunking: ChunkingConfig,
    pub index: IndexOptions,
    pub top_k: usize,
    pub search_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            store_dir: PathBuf::from("embeddings"),
            index_path: PathBuf::from("index/flat.index"),
            chunking: ChunkingConfig::default(),
            index: IndexOptions::default(),
            top_k: 5,
            search_timeout: None,
        }
    }
}
