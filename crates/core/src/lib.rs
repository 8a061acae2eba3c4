pub mod chunking;
pub mod cleaning;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod npy;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod traits;

pub use chunking::Chunker;
pub use cleaning::{normalize_whitespace, TextCleaner};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingModel, EmbeddingPrefixes, OllamaConfig,
    OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbedError, IndexError, IngestError, PipelineError, RetrievalError, StoreError};
pub use index::{build_and_save_index, build_index, search_index, FlatIndex};
pub use ingest::{chunk_file, chunk_folder, discover_files, IngestionReport, SkippedFile};
pub use models::{
    l2_normalize, Chunk, ChunkingConfig, CorpusManifest, EmbeddingMatrix, IndexOptions,
    PipelineConfig, RetrievedChunk, SearchHit,
};
pub use pipeline::{build_corpus, BuildReport};
pub use retriever::{retrieve_context, validate_query, Retriever};
pub use store::{load_snapshot, read_manifest, save_snapshot, VectorSnapshot};
pub use traits::{Neighbor, VectorIndex};
