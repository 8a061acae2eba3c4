use crate::chunking::Chunker;
use crate::embeddings::{Embedder, EmbeddingModel};
use crate::error::PipelineError;
use crate::index::build_and_save_index;
use crate::ingest::{chunk_folder, SkippedFile};
use crate::models::PipelineConfig;
use crate::store::save_snapshot;
use std::path::PathBuf;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub files_chunked: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub chunk_count: usize,
    pub dimensions: usize,
    pub snapshot_id: Uuid,
    pub store_dir: PathBuf,
    pub index_path: PathBuf,
}

/// Chunks `config.data_dir`, embeds every chunk, persists the snapshot and
/// builds the index over it.
///
/// Nothing is written unless chunking produced at least one chunk and every
/// chunk embedded successfully.
pub fn build_corpus<M: EmbeddingModel>(
    config: &PipelineConfig,
    embedder: &Embedder<M>,
) -> Result<BuildReport, PipelineError> {
    let result = run_build(config, embedder);
    if let Err(build_error) = &result {
        error!(data_dir = %config.data_dir.display(), error = %build_error, "build failed");
    }
    result
}

fn run_build<M: EmbeddingModel>(
    config: &PipelineConfig,
    embedder: &Embedder<M>,
) -> Result<BuildReport, PipelineError> {
    let chunker = Chunker::new(config.chunking)?;

    info!(data_dir = %config.data_dir.display(), "chunking corpus");
    let report = chunk_folder(&config.data_dir, &chunker)?;
    if report.chunks.is_empty() {
        return Err(PipelineError::NoChunks(config.data_dir.clone()));
    }

    info!(
        chunks = report.chunks.len(),
        model = embedder.model_name(),
        "embedding chunks"
    );
    let embeddings = embedder.embed_chunks(&report.chunks)?;
    let dimensions = embeddings.dimensions();

    let manifest = save_snapshot(
        &embeddings,
        &report.chunks,
        embedder.model_name(),
        &config.store_dir,
    )?;

    build_and_save_index(
        embeddings,
        &config.index,
        manifest.snapshot_id,
        &config.index_path,
    )?;

    info!(
        snapshot_id = %manifest.snapshot_id,
        rows = manifest.rows,
        dimensions,
        "corpus built"
    );

    Ok(BuildReport {
        files_chunked: report.files_chunked,
        skipped_files: report.skipped_files,
        chunk_count: manifest.rows,
        dimensions,
        snapshot_id: manifest.snapshot_id,
        store_dir: config.store_dir.clone(),
        index_path: config.index_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbedError;
    use crate::store::read_manifest;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(root: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: root.join("data"),
            store_dir: root.join("embeddings"),
            index_path: root.join("index").join("flat.index"),
            ..PipelineConfig::default()
        }
    }

    struct BrokenModel;

    impl EmbeddingModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Backend {
                backend: "broken".to_string(),
                details: "model unavailable".to_string(),
            })
        }
    }

    #[test]
    fn build_writes_store_and_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.data_dir)?;
        fs::write(
            config.data_dir.join("1.txt"),
            "The Sorting Hat places students into houses.\n\nEach house has a common room.",
        )?;
        fs::write(config.data_dir.join("cover.png"), [0u8, 1, 2])?;

        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        let report = build_corpus(&config, &embedder)?;

        assert_eq!(report.files_chunked, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert!(report.chunk_count > 0);
        assert_eq!(report.dimensions, embedder.dimensions());
        assert!(config.index_path.is_file());

        let manifest = read_manifest(&config.store_dir)?;
        assert_eq!(manifest.snapshot_id, report.snapshot_id);
        assert_eq!(manifest.rows, report.chunk_count);
        Ok(())
    }

    #[test]
    fn empty_corpus_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.data_dir)?;
        fs::write(config.data_dir.join("blank.txt"), "   \n")?;

        let embedder = Embedder::new(CharacterNgramEmbedder::default());
        let result = build_corpus(&config, &embedder);

        assert!(matches!(result, Err(PipelineError::NoChunks(_))));
        assert!(!config.store_dir.exists());
        assert!(!config.index_path.exists());
        Ok(())
    }

    #[test]
    fn embedding_failure_aborts_before_saving() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.data_dir)?;
        fs::write(config.data_dir.join("1.txt"), "Hedwig delivers the mail.")?;

        let result = build_corpus(&config, &Embedder::new(BrokenModel));

        assert!(matches!(result, Err(PipelineError::Embed(_))));
        assert!(!config.store_dir.exists());
        assert!(!config.index_path.exists());
        Ok(())
    }

    #[test]
    fn missing_data_dir_is_an_ingest_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());

        let result = build_corpus(&config, &Embedder::new(CharacterNgramEmbedder::default()));
        assert!(matches!(result, Err(PipelineError::Ingest(_))));
        Ok(())
    }
}
