use crate::embeddings::{Embedder, EmbeddingModel};
use crate::error::RetrievalError;
use crate::index::{search_index, FlatIndex};
use crate::models::{CorpusManifest, PipelineConfig, RetrievedChunk};
use crate::store::{load_snapshot, VectorSnapshot};
use crate::traits::VectorIndex;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn validate_query(query: &str) -> Result<&str, RetrievalError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        error!("rejected empty query");
        return Err(RetrievalError::InvalidQuery(
            "query must be a non-empty string".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Read-only query handle over one loaded snapshot and its index.
///
/// Nothing is mutated after [`Retriever::open`], so a single handle can serve
/// many threads at once.
pub struct Retriever<'a, M> {
    embedder: &'a Embedder<M>,
    snapshot: VectorSnapshot,
    index: FlatIndex,
    top_k: usize,
    search_timeout: Option<Duration>,
}

impl<'a, M: EmbeddingModel> Retriever<'a, M> {
    pub fn open(
        config: &PipelineConfig,
        embedder: &'a Embedder<M>,
    ) -> Result<Self, RetrievalError> {
        info!(dir = %config.store_dir.display(), "loading embeddings and chunks");
        let snapshot = load_snapshot(&config.store_dir)?;

        info!(path = %config.index_path.display(), "loading index");
        let index = FlatIndex::load(&config.index_path)?;

        check_alignment(&snapshot.manifest, &index, embedder)?;

        Ok(Self {
            embedder,
            snapshot,
            index,
            top_k: config.top_k,
            search_timeout: config.search_timeout,
        })
    }

    pub fn manifest(&self) -> &CorpusManifest {
        &self.snapshot.manifest
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.retrieve_top(query, self.top_k)
    }

    pub fn retrieve_top(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let query = validate_query(query)?;
        info!(query, k, "running semantic search");

        let vector = self.embedder.embed_query(query)?;
        let hits = search_index(&self.index, &vector, k, self.search_timeout)?;

        let results = hits
            .into_iter()
            .map(|hit| {
                let chunk = self.snapshot.chunks.get(hit.row).ok_or_else(|| {
                    RetrievalError::SnapshotMismatch(format!(
                        "index returned row {} but metadata holds {} chunks",
                        hit.row,
                        self.snapshot.chunks.len()
                    ))
                })?;
                Ok(RetrievedChunk {
                    rank: hit.rank,
                    score: hit.score,
                    text: chunk.text.clone(),
                })
            })
            .collect::<Result<Vec<_>, RetrievalError>>()?;

        info!(query, results = results.len(), "retrieved context chunks");
        Ok(results)
    }
}

fn check_alignment<M: EmbeddingModel>(
    manifest: &CorpusManifest,
    index: &FlatIndex,
    embedder: &Embedder<M>,
) -> Result<(), RetrievalError> {
    let mismatch = if index.snapshot_id() != manifest.snapshot_id {
        Some(format!(
            "index was built from snapshot {} but the store holds {}",
            index.snapshot_id(),
            manifest.snapshot_id
        ))
    } else if index.len() != manifest.rows {
        Some(format!(
            "index holds {} rows but the store holds {}",
            index.len(),
            manifest.rows
        ))
    } else if index.dimensions() != embedder.dimensions() {
        Some(format!(
            "index has {} dimensions but the embedder produces {}",
            index.dimensions(),
            embedder.dimensions()
        ))
    } else {
        None
    };

    if let Some(details) = mismatch {
        error!(%details, "store and index do not belong together");
        return Err(RetrievalError::SnapshotMismatch(details));
    }

    if manifest.model != embedder.model_name() {
        warn!(
            built_with = %manifest.model,
            querying_with = embedder.model_name(),
            "query model differs from the build model"
        );
    }
    Ok(())
}

/// Validates `query`, loads fresh handles from `config` and searches once.
///
/// Long-running callers should keep a [`Retriever`] instead.
pub fn retrieve_context<M: EmbeddingModel>(
    config: &PipelineConfig,
    embedder: &Embedder<M>,
    query: &str,
) -> Result<Vec<RetrievedChunk>, RetrievalError> {
    validate_query(query)?;
    Retriever::open(config, embedder)?.retrieve(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::build_and_save_index;
    use crate::models::{Chunk, IndexOptions};
    use crate::store::save_snapshot;
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(root: &Path) -> PipelineConfig {
        PipelineConfig {
            store_dir: root.join("embeddings"),
            index_path: root.join("index").join("flat.index"),
            top_k: 2,
            ..PipelineConfig::default()
        }
    }

    fn build(
        config: &PipelineConfig,
        embedder: &Embedder<CharacterNgramEmbedder>,
        texts: &[&str],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(position, text)| Chunk {
                document_id: "1.txt".to_string(),
                position,
                text: text.to_string(),
            })
            .collect::<Vec<_>>();
        let embeddings = embedder.embed_chunks(&chunks)?;
        let manifest =
            save_snapshot(&embeddings, &chunks, embedder.model_name(), &config.store_dir)?;
        build_and_save_index(
            embeddings,
            &IndexOptions::default(),
            manifest.snapshot_id,
            &config.index_path,
        )?;
        Ok(())
    }

    #[test]
    fn empty_queries_are_rejected_before_io() {
        let config = PipelineConfig {
            store_dir: "/nonexistent/store".into(),
            index_path: "/nonexistent/index".into(),
            ..PipelineConfig::default()
        };
        let embedder = Embedder::new(CharacterNgramEmbedder::default());

        for query in ["", "   ", "\n\t"] {
            let result = retrieve_context(&config, &embedder, query);
            assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
        }
    }

    #[test]
    fn retrieval_returns_ranked_chunk_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        build(
            &config,
            &embedder,
            &[
                "Diagon Alley is a shopping street in London.",
                "Quidditch is played on broomsticks.",
                "Hogwarts is a school of witchcraft.",
            ],
        )?;

        let results = retrieve_context(&config, &embedder, "quidditch broomsticks")?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].text, "Quidditch is played on broomsticks.");
        assert!(results[0].score <= results[1].score);
        Ok(())
    }

    #[test]
    fn index_from_another_build_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        build(&config, &embedder, &["first build", "second row"])?;

        let stale = FlatIndex::load(&config.index_path)?;
        build(&config, &embedder, &["rebuilt corpus", "second row"])?;
        stale.save(&config.index_path)?;

        let result = Retriever::open(&config, &embedder);
        assert!(matches!(result, Err(RetrievalError::SnapshotMismatch(_))));
        Ok(())
    }

    #[test]
    fn embedder_dimension_must_match_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        build(
            &config,
            &Embedder::new(CharacterNgramEmbedder::default()),
            &["owl post", "floo network"],
        )?;

        let narrow = Embedder::new(CharacterNgramEmbedder { dimensions: 8 });
        let result = Retriever::open(&config, &narrow);
        assert!(matches!(result, Err(RetrievalError::SnapshotMismatch(_))));
        Ok(())
    }

    #[test]
    fn missing_index_is_a_fatal_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        build(&config, &embedder, &["a chunk"])?;
        std::fs::remove_file(&config.index_path)?;

        let result = retrieve_context(&config, &embedder, "anything");
        assert!(matches!(result, Err(RetrievalError::Index(_))));
        Ok(())
    }

    #[test]
    fn search_timeout_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = PipelineConfig {
            search_timeout: Some(Duration::ZERO),
            ..config_in(dir.path())
        };
        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        build(&config, &embedder, &["a chunk"])?;

        let retriever = Retriever::open(&config, &embedder)?;
        assert!(matches!(
            retriever.retrieve("a chunk"),
            Err(RetrievalError::Index(crate::IndexError::Timeout(_)))
        ));
        Ok(())
    }
}
