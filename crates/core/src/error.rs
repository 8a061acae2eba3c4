use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("folder not found: {0}")]
    FolderNotFound(PathBuf),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("nothing to embed")]
    EmptyInput,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding backend {backend} failed: {details}")]
    Backend { backend: String, details: String },

    #[error("malformed embedding output: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid npy artifact: {0}")]
    Npy(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("refusing to save an empty snapshot")]
    EmptySnapshot,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build an index from zero embeddings")]
    EmptyEmbeddings,

    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt index file {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("invalid index options: {0}")]
    InvalidOptions(String),

    #[error("search exceeded its deadline of {0:?}")]
    Timeout(std::time::Duration),
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embed(#[from] EmbedError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no usable chunks were produced from {0}")]
    NoChunks(PathBuf),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),
}
