use crate::error::StoreError;
use crate::models::{Chunk, CorpusManifest, EmbeddingMatrix};
use crate::npy;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const EMBEDDINGS_FILE: &str = "embedding.npy";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

/// Embeddings and chunk metadata from one build, row-aligned.
#[derive(Debug, Clone)]
pub struct VectorSnapshot {
    pub manifest: CorpusManifest,
    pub embeddings: EmbeddingMatrix,
    pub chunks: Vec<Chunk>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Persists `embeddings` and `chunks` under `dir`.
///
/// The files are staged in a sibling directory which then replaces `dir` in
/// one rename, so readers never see a half-written snapshot.
pub fn save_snapshot(
    embeddings: &EmbeddingMatrix,
    chunks: &[Chunk],
    model: &str,
    dir: &Path,
) -> Result<CorpusManifest, StoreError> {
    let result = write_snapshot(embeddings, chunks, model, dir);
    if let Err(save_error) = &result {
        error!(dir = %dir.display(), error = %save_error, "saving embeddings and metadata failed");
    }
    result
}

fn write_snapshot(
    embeddings: &EmbeddingMatrix,
    chunks: &[Chunk],
    model: &str,
    dir: &Path,
) -> Result<CorpusManifest, StoreError> {
    if embeddings.rows() != chunks.len() {
        return Err(StoreError::DataIntegrity(format!(
            "{} embeddings for {} chunks",
            embeddings.rows(),
            chunks.len()
        )));
    }
    if chunks.is_empty() {
        return Err(StoreError::EmptySnapshot);
    }

    let embedding_bytes = npy::encode(embeddings);
    let metadata_bytes = serde_json::to_vec_pretty(chunks)?;
    let manifest = CorpusManifest {
        format_version: FORMAT_VERSION,
        snapshot_id: Uuid::new_v4(),
        created_at: Utc::now(),
        model: model.to_string(),
        rows: embeddings.rows(),
        dimensions: embeddings.dimensions(),
        embeddings_sha256: sha256_hex(&embedding_bytes),
        metadata_sha256: sha256_hex(&metadata_bytes),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    if let Some(parent) = dir.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))?;
    }

    let staging = sibling(dir, "staging", manifest.snapshot_id);
    fs::create_dir_all(&staging).map_err(|source| StoreError::io(&staging, source))?;

    let staged = write_file(&staging.join(EMBEDDINGS_FILE), &embedding_bytes)
        .and_then(|()| write_file(&staging.join(METADATA_FILE), &metadata_bytes))
        .and_then(|()| write_file(&staging.join(MANIFEST_FILE), &manifest_bytes))
        .and_then(|()| replace_dir(&staging, dir, manifest.snapshot_id));

    if let Err(stage_error) = staged {
        if let Err(cleanup_error) = fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %cleanup_error, "could not remove staging directory");
        }
        return Err(stage_error);
    }

    info!(
        dir = %dir.display(),
        rows = manifest.rows,
        dimensions = manifest.dimensions,
        snapshot_id = %manifest.snapshot_id,
        "saved embeddings and metadata"
    );
    Ok(manifest)
}

pub fn read_manifest(dir: &Path) -> Result<CorpusManifest, StoreError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path).map_err(|source| StoreError::io(&path, source))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Loads a snapshot and verifies that all three files belong together.
///
/// Row counts are compared first; a mismatch is a hard failure and nothing
/// is truncated to fit.
pub fn load_snapshot(dir: &Path) -> Result<VectorSnapshot, StoreError> {
    let result = read_snapshot(dir);
    match &result {
        Ok(snapshot) => info!(
            dir = %dir.display(),
            rows = snapshot.embeddings.rows(),
            chunks = snapshot.chunks.len(),
            snapshot_id = %snapshot.manifest.snapshot_id,
            "loaded embeddings and chunks"
        ),
        Err(load_error) => {
            error!(dir = %dir.display(), error = %load_error, "loading embeddings and metadata failed")
        }
    }
    result
}

fn read_snapshot(dir: &Path) -> Result<VectorSnapshot, StoreError> {
    let embeddings_path = dir.join(EMBEDDINGS_FILE);
    let embedding_bytes =
        fs::read(&embeddings_path).map_err(|source| StoreError::io(&embeddings_path, source))?;
    let embeddings = npy::decode(&embedding_bytes)?;

    let metadata_path = dir.join(METADATA_FILE);
    let metadata_bytes =
        fs::read(&metadata_path).map_err(|source| StoreError::io(&metadata_path, source))?;
    let chunks: Vec<Chunk> = serde_json::from_slice(&metadata_bytes)?;

    if embeddings.rows() != chunks.len() {
        return Err(StoreError::DataIntegrity(format!(
            "{} holds {} rows but {} holds {} chunks",
            EMBEDDINGS_FILE,
            embeddings.rows(),
            METADATA_FILE,
            chunks.len()
        )));
    }

    let manifest = read_manifest(dir)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(StoreError::DataIntegrity(format!(
            "unsupported snapshot format {}",
            manifest.format_version
        )));
    }
    if manifest.rows != embeddings.rows() || manifest.dimensions != embeddings.dimensions() {
        return Err(StoreError::DataIntegrity(format!(
            "manifest describes {}x{}, artifacts are {}x{}",
            manifest.rows,
            manifest.dimensions,
            embeddings.rows(),
            embeddings.dimensions()
        )));
    }
    if manifest.embeddings_sha256 != sha256_hex(&embedding_bytes) {
        return Err(StoreError::DataIntegrity(format!(
            "{EMBEDDINGS_FILE} does not match the manifest checksum"
        )));
    }
    if manifest.metadata_sha256 != sha256_hex(&metadata_bytes) {
        return Err(StoreError::DataIntegrity(format!(
            "{METADATA_FILE} does not match the manifest checksum"
        )));
    }

    Ok(VectorSnapshot {
        manifest,
        embeddings,
        chunks,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(path).map_err(|source| StoreError::io(path, source))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|source| StoreError::io(path, source))
}

fn sibling(dir: &Path, tag: &str, id: Uuid) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot");
    dir.with_file_name(format!(".{name}.{tag}-{}", id.simple()))
}

fn replace_dir(staging: &Path, target: &Path, id: Uuid) -> Result<(), StoreError> {
    if !target.exists() {
        return fs::rename(staging, target).map_err(|source| StoreError::io(target, source));
    }

    let retired = sibling(target, "retired", id);
    fs::rename(target, &retired).map_err(|source| StoreError::io(target, source))?;

    if let Err(source) = fs::rename(staging, target) {
        if let Err(restore_error) = fs::rename(&retired, target) {
            error!(path = %retired.display(), error = %restore_error, "could not restore previous snapshot");
        }
        return Err(StoreError::io(target, source));
    }

    if let Err(cleanup_error) = fs::remove_dir_all(&retired) {
        warn!(path = %retired.display(), error = %cleanup_error, "could not remove previous snapshot");
    }
    Ok(())
}
