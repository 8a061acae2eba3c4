use crate::chunking::Chunker;
use crate::error::IngestError;
use crate::models::Chunk;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub files_chunked: usize,
    pub skipped_files: Vec<SkippedFile>,
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
}

/// Lists the regular files directly inside `folder`, sorted by path so the
/// resulting chunk order is stable across runs.
pub fn discover_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::FolderNotFound(folder.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(walk_error) => {
                warn!(folder = %folder.display(), error = %walk_error, "unreadable folder entry");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn chunk_file(chunker: &Chunker, path: &Path) -> Result<Vec<Chunk>, IngestError> {
    let document_id = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        warn!(path = %path.display(), "content not found");
        return Ok(Vec::new());
    }

    let chunks = chunker.chunk_document(document_id, &raw);
    info!(path = %path.display(), chunks = chunks.len(), "split file into chunks");
    Ok(chunks)
}

/// Chunks every `.txt` file in `folder` and concatenates the results in file
/// order. A file that fails is logged and reported, never fatal; only a
/// missing folder aborts the run.
pub fn chunk_folder(folder: &Path, chunker: &Chunker) -> Result<IngestionReport, IngestError> {
    let files = match discover_files(folder) {
        Ok(files) => files,
        Err(discover_error) => {
            error!(folder = %folder.display(), error = %discover_error, "cannot list folder");
            return Err(discover_error);
        }
    };

    let mut report = IngestionReport::default();
    let file_count = files.len();

    for path in files {
        if !is_text_file(&path) {
            info!(path = %path.display(), "skipping non-text file");
            report.skipped_files.push(SkippedFile {
                path,
                reason: "not a .txt file".to_string(),
            });
            continue;
        }

        match chunk_file(chunker, &path) {
            Ok(chunks) => {
                report.files_chunked += 1;
                report.chunks.extend(chunks);
            }
            Err(chunk_error) => {
                error!(path = %path.display(), error = %chunk_error, "failed to chunk file");
                report.skipped_files.push(SkippedFile {
                    path,
                    reason: chunk_error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        files = file_count,
        chunks = report.chunks.len(),
        skipped = report.skipped_files.len(),
        "finished chunking folder"
    );
    Ok(report)
}
