use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rag_index_core::{
    build_corpus, chunk_folder, read_manifest, CharacterNgramEmbedder, Chunker, ChunkingConfig,
    Embedder, EmbeddingModel, EmbeddingPrefixes, IndexError, IndexOptions, OllamaConfig,
    OllamaEmbedder, PipelineConfig, RetrievalError, Retriever, StoreError,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rag-index", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder holding the `.txt` corpus.
    #[arg(long, global = true, env = "RAG_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory for embedding.npy, metadata.json and manifest.json.
    #[arg(long, global = true, env = "RAG_STORE_DIR", default_value = "embeddings")]
    store_dir: PathBuf,

    /// Index file path.
    #[arg(long, global = true, env = "RAG_INDEX_PATH", default_value = "index/flat.index")]
    index_path: PathBuf,

    /// Maximum chunk length in characters.
    #[arg(long, global = true, env = "RAG_CHUNK_SIZE", default_value = "100")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[arg(long, global = true, env = "RAG_CHUNK_OVERLAP", default_value = "50")]
    chunk_overlap: usize,

    /// Rows inserted into the index per batch.
    #[arg(long, global = true, env = "RAG_BATCH_SIZE", default_value = "1000")]
    batch_size: usize,

    /// Skip index-side normalization.
    #[arg(long, global = true, default_value_t = false)]
    no_normalize: bool,

    /// Embedding backend.
    #[arg(
        long,
        global = true,
        env = "RAG_EMBEDDER",
        value_enum,
        default_value_t = EmbedderKind::Hashing
    )]
    embedder: EmbedderKind,

    /// Vector width; defaults to the backend's own.
    #[arg(long, global = true, env = "RAG_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Ollama base URL
    #[arg(
        long,
        global = true,
        env = "RAG_OLLAMA_URL",
        default_value = "http://localhost:11434"
    )]
    ollama_url: String,

    /// Ollama embedding model
    #[arg(long, global = true, env = "RAG_OLLAMA_MODEL", default_value = "nomic-embed-text")]
    ollama_model: String,

    /// Seconds an embedding request may take.
    #[arg(long, global = true, env = "RAG_EMBED_TIMEOUT_SECS", default_value = "30")]
    embed_timeout_secs: u64,

    /// Marker prepended to chunks before embedding; defaults per model.
    #[arg(long, global = true, env = "RAG_PASSAGE_PREFIX")]
    passage_prefix: Option<String>,

    /// Marker prepended to queries before embedding; defaults per model.
    #[arg(long, global = true, env = "RAG_QUERY_PREFIX")]
    query_prefix: Option<String>,

    /// Milliseconds a single index search may take.
    #[arg(long, global = true, env = "RAG_SEARCH_TIMEOUT_MS")]
    search_timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Offline hashed character trigrams.
    Hashing,
    /// Ollama `/api/embed` server.
    Ollama,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk the data folder and print a summary without embedding.
    Chunk {
        /// Print every chunk.
        #[arg(long, default_value_t = false)]
        show: bool,
    },
    /// Chunk, embed, persist and index the data folder.
    Build,
    /// Retrieve the chunks closest to a query.
    Query {
        /// Query text. Reads one query per line from stdin when omitted.
        #[arg(long)]
        query: Option<String>,
        /// Number of chunks to return.
        #[arg(long, env = "RAG_TOP_K", default_value = "5")]
        top_k: usize,
    },
    /// Print the manifest of the current snapshot.
    Inspect,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            data_dir: self.data_dir.clone(),
            store_dir: self.store_dir.clone(),
            index_path: self.index_path.clone(),
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            },
            index: IndexOptions {
                normalize: !self.no_normalize,
                batch_size: self.batch_size,
            },
            search_timeout: self.search_timeout_ms.map(Duration::from_millis),
            ..PipelineConfig::default()
        }
    }

    fn embedder(&self) -> anyhow::Result<Embedder<Box<dyn EmbeddingModel>>> {
        let model: Box<dyn EmbeddingModel> = match self.embedder {
            EmbedderKind::Hashing => Box::new(CharacterNgramEmbedder {
                dimensions: self
                    .embedding_dimensions
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            }),
            EmbedderKind::Ollama => {
                let defaults = OllamaConfig::default();
                let config = OllamaConfig {
                    base_url: self.ollama_url.clone(),
                    model: self.ollama_model.clone(),
                    dimensions: self.embedding_dimensions.unwrap_or(defaults.dimensions),
                    timeout: Duration::from_secs(self.embed_timeout_secs),
                    ..defaults
                };
                Box::new(OllamaEmbedder::new(config).context("cannot configure ollama client")?)
            }
        };
        let defaults = EmbeddingPrefixes::for_model(model.name());
        let prefixes = EmbeddingPrefixes {
            passage: self.passage_prefix.clone().unwrap_or(defaults.passage),
            query: self.query_prefix.clone().unwrap_or(defaults.query),
        };
        Ok(Embedder::with_prefixes(model, prefixes))
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "rag-index boot"
    );

    let mut config = cli.pipeline_config();

    match &cli.command {
        Command::Chunk { show } => {
            let chunker = Chunker::new(config.chunking)?;
            let report = chunk_folder(&config.data_dir, &chunker)
                .with_context(|| format!("cannot chunk {}", config.data_dir.display()))?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            if *show {
                for chunk in &report.chunks {
                    println!("[{}#{}] {}", chunk.document_id, chunk.position, chunk.text);
                }
            }
            println!(
                "{} chunks from {} files ({} skipped)",
                report.chunks.len(),
                report.files_chunked,
                report.skipped_files.len()
            );
        }
        Command::Build => {
            let embedder = cli.embedder()?;
            let report = build_corpus(&config, &embedder).context("build failed")?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            println!(
                "{} chunks from {} files embedded with {} ({} dimensions)",
                report.chunk_count,
                report.files_chunked,
                embedder.model_name(),
                report.dimensions
            );
            println!(
                "snapshot {} saved to {}",
                report.snapshot_id,
                report.store_dir.display()
            );
            println!(
                "index saved to {} at {}",
                report.index_path.display(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query { query, top_k } => {
            config.top_k = *top_k;
            let embedder = cli.embedder()?;
            let retriever = Retriever::open(&config, &embedder)
                .map_err(|error| anyhow::anyhow!(describe(&error)))?;

            match query {
                Some(query) => {
                    let results = retriever
                        .retrieve(query)
                        .map_err(|error| anyhow::anyhow!(describe(&error)))?;
                    print_results(&results);
                }
                None => query_loop(&retriever)?,
            }
        }
        Command::Inspect => {
            let manifest = read_manifest(&config.store_dir)
                .with_context(|| format!("no snapshot in {}", config.store_dir.display()))?;
            println!("snapshot_id: {}", manifest.snapshot_id);
            println!("created_at: {}", manifest.created_at.to_rfc3339());
            println!("format_version: {}", manifest.format_version);
            println!("model: {}", manifest.model);
            println!("rows: {}", manifest.rows);
            println!("dimensions: {}", manifest.dimensions);
            println!("embeddings_sha256: {}", manifest.embeddings_sha256);
            println!("metadata_sha256: {}", manifest.metadata_sha256);
        }
    }

    Ok(())
}

fn query_loop<M: EmbeddingModel>(retriever: &Retriever<'_, M>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    eprintln!(
        "{} chunks loaded. Enter a query per line, or `exit` to quit.",
        retriever.len()
    );

    loop {
        write!(stdout, "query> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }

        match retriever.retrieve(line) {
            Ok(results) => print_results(&results),
            Err(error) => println!("error: {}", describe(&error)),
        }
    }
    Ok(())
}

fn print_results(results: &[rag_index_core::RetrievedChunk]) {
    if results.is_empty() {
        println!("no matching chunks");
    }
    for result in results {
        println!("[{}] score={:.4}\n{}", result.rank, result.score, result.text);
    }
}

fn describe(error: &RetrievalError) -> String {
    match error {
        RetrievalError::InvalidQuery(_) => "please enter a non-empty query".to_string(),
        RetrievalError::SnapshotMismatch(details) => {
            format!("index and stored embeddings disagree ({details}); run `rag-index build` again")
        }
        RetrievalError::Store(StoreError::Io { path, source })
        | RetrievalError::Index(IndexError::Io { path, source })
            if source.kind() == io::ErrorKind::NotFound =>
        {
            format!("{} is missing; run `rag-index build` first", path.display())
        }
        RetrievalError::Index(IndexError::Timeout(limit)) => {
            format!("search gave up after {limit:?}")
        }
        RetrievalError::Embed(embed_error) => format!("could not embed the query: {embed_error}"),
        other => other.to_string(),
    }
}
