pub mod ollama;

pub use ollama::{OllamaConfig, OllamaEmbedder};

use crate::error::EmbedError;
use crate::models::{l2_normalize, Chunk, EmbeddingMatrix};
use tracing::{error, info, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// A backend that turns text into fixed-length vectors.
///
/// Implementations are shared read-only between query threads, so they must
/// not mutate themselves while encoding.
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

impl<M: EmbeddingModel + ?Sized> EmbeddingModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).encode(inputs)
    }
}

/// Hashed character trigram counts. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for character in window {
                let mut buffer = [0u8; 4];
                for byte in character.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        vector
    }
}

impl EmbeddingModel for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(inputs.iter().map(|input| self.embed_one(input)).collect())
    }
}

/// Role markers prepended before encoding. Build time uses `passage`, query
/// time uses `query`; both sides must agree for a given index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingPrefixes {
    pub passage: String,
    pub query: String,
}

impl Default for EmbeddingPrefixes {
    fn default() -> Self {
        Self {
            passage: "passage: ".to_string(),
            query: "query: ".to_string(),
        }
    }
}

impl EmbeddingPrefixes {
    /// Markers a model was trained with, falling back to the
    /// `passage: `/`query: ` pair for models without their own.
    pub fn for_model(model: &str) -> Self {
        let family = model.split(':').next().unwrap_or(model);
        match family {
            "nomic-embed-text" => Self {
                passage: "search_document: ".to_string(),
                query: "search_query: ".to_string(),
            },
            "mxbai-embed-large" => Self {
                passage: String::new(),
                query: "Represent this sentence for searching relevant passages: ".to_string(),
            },
            _ => Self::default(),
        }
    }
}

/// Owns an [`EmbeddingModel`] and is the single place vectors get
/// unit-normalized.
#[derive(Debug, Clone)]
pub struct Embedder<M> {
    model: M,
    prefixes: EmbeddingPrefixes,
}

impl<M: EmbeddingModel> Embedder<M> {
    pub fn new(model: M) -> Self {
        Self::with_prefixes(model, EmbeddingPrefixes::default())
    }

    pub fn with_prefixes(model: M, prefixes: EmbeddingPrefixes) -> Self {
        Self { model, prefixes }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    pub fn prefixes(&self) -> &EmbeddingPrefixes {
        &self.prefixes
    }

    pub fn embed_chunks(&self, chunks: &[Chunk]) -> Result<EmbeddingMatrix, EmbedError> {
        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        self.embed_passages(&texts)
    }

    /// Embeds passages for indexing. Either every row is produced or the call
    /// fails; a partial matrix is never returned.
    pub fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingMatrix, EmbedError> {
        if texts.is_empty() {
            error!("embedding requested for zero chunks");
            return Err(EmbedError::EmptyInput);
        }

        info!(
            model = self.model.name(),
            chunks = texts.len(),
            "starting embedding"
        );

        let inputs = texts
            .iter()
            .map(|text| format!("{}{}", self.prefixes.passage, text))
            .collect::<Vec<_>>();

        let result = self
            .encode_normalized(&inputs)
            .and_then(|rows| {
                EmbeddingMatrix::from_rows(rows)
                    .map_err(|matrix_error| EmbedError::MalformedOutput(matrix_error.to_string()))
            });

        match result {
            Ok(matrix) => {
                info!(
                    rows = matrix.rows(),
                    dimensions = matrix.dimensions(),
                    "generated embeddings"
                );
                Ok(matrix)
            }
            Err(embed_error) => {
                error!(model = self.model.name(), error = %embed_error, "embedding chunks failed");
                Err(embed_error)
            }
        }
    }

    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let input = vec![format!("{}{}", self.prefixes.query, query)];
        let mut rows = self.encode_normalized(&input).map_err(|embed_error| {
            error!(model = self.model.name(), error = %embed_error, "embedding query failed");
            embed_error
        })?;
        rows.pop().ok_or_else(|| {
            EmbedError::MalformedOutput("model returned no vector for the query".to_string())
        })
    }

    fn encode_normalized(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut rows = self.model.encode(inputs)?;
        check_output(&rows, inputs.len(), self.model.dimensions())?;

        let mut zero_rows = 0usize;
        for row in &mut rows {
            if !l2_normalize(row) {
                zero_rows += 1;
            }
        }
        if zero_rows > 0 {
            warn!(zero_rows, "model produced zero vectors; left unnormalized");
        }

        Ok(rows)
    }
}

fn check_output(
    rows: &[Vec<f32>],
    expected_rows: usize,
    dimensions: usize,
) -> Result<(), EmbedError> {
    if rows.len() != expected_rows {
        return Err(EmbedError::MalformedOutput(format!(
            "expected {expected_rows} vectors, model returned {}",
            rows.len()
        )));
    }

    for (position, row) in rows.iter().enumerate() {
        if row.len() != dimensions {
            return Err(EmbedError::MalformedOutput(format!(
                "vector {position} has {} dimensions, expected {dimensions}",
                row.len()
            )));
        }
        if row.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::MalformedOutput(format!(
                "vector {position} contains non-finite values"
            )));
        }
    }

    Ok(())
}
