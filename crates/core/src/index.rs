use crate::error::IndexError;
use crate::models::{EmbeddingMatrix, IndexOptions, SearchHit};
use crate::traits::{Neighbor, VectorIndex};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAGIC: &[u8; 8] = b"RAGFLAT1";
const HEADER_LEN: usize = 8 + 4 + 8 + 16;
const CHECKSUM_LEN: usize = 32;
/// Rows scored between deadline checks.
const BLOCK_ROWS: usize = 4_096;

/// Exact brute-force index over squared Euclidean distance.
///
/// With unit-length rows, ascending distance is descending cosine similarity.
/// Search runs on the calling thread only.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    values: Vec<f32>,
    snapshot_id: Uuid,
}

impl FlatIndex {
    pub fn new(dimensions: usize, snapshot_id: Uuid) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::InvalidOptions(
                "index dimension must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            dimensions,
            values: Vec::new(),
            snapshot_id,
        })
    }

    /// Identifier of the store snapshot this index was built from.
    pub fn snapshot_id(&self) -> Uuid {
        self.snapshot_id
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimensions)?;
        self.values.get(start..start + self.dimensions)
    }

    /// Writes the index to `path` through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let result = self.write_to(path);
        match &result {
            Ok(()) => info!(path = %path.display(), rows = self.len(), "index saved"),
            Err(save_error) => {
                error!(path = %path.display(), error = %save_error, "failed to save index")
            }
        }
        result
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let result = Self::read_from(path);
        match &result {
            Ok(index) => info!(
                path = %path.display(),
                rows = index.len(),
                dimensions = index.dimensions,
                "index loaded"
            ),
            Err(load_error) => {
                error!(path = %path.display(), error = %load_error, "could not load index")
            }
        }
        result
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.values.len() * 4 + CHECKSUM_LEN);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(self.snapshot_id.as_bytes());
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let checksum = sha2_digest(&bytes);
        bytes.extend_from_slice(&checksum);
        bytes
    }

    fn write_to(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IndexError::io(parent, source))?;
        }

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("index");
        let temporary = path.with_file_name(format!(".{name}.tmp-{}", Uuid::new_v4().simple()));

        let written = File::create(&temporary)
            .and_then(|mut file| {
                file.write_all(&self.encode())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temporary, path));

        if let Err(source) = written {
            match fs::remove_file(&temporary) {
                Err(cleanup_error) if cleanup_error.kind() != ErrorKind::NotFound => {
                    warn!(
                        path = %temporary.display(),
                        error = %cleanup_error,
                        "could not remove temporary index file"
                    );
                }
                _ => {}
            }
            return Err(IndexError::io(path, source));
        }
        Ok(())
    }

    fn read_from(path: &Path) -> Result<Self, IndexError> {
        let bytes = fs::read(path).map_err(|source| IndexError::io(path, source))?;
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(IndexError::corrupt(path, "file is shorter than its header"));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(IndexError::corrupt(path, "unrecognized file signature"));
        }

        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if sha2_digest(body) != checksum {
            return Err(IndexError::corrupt(path, "checksum mismatch"));
        }

        let dimensions = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
        let mut rows_raw = [0u8; 8];
        rows_raw.copy_from_slice(&body[12..20]);
        let rows = u64::from_le_bytes(rows_raw) as usize;
        let mut id_raw = [0u8; 16];
        id_raw.copy_from_slice(&body[20..HEADER_LEN]);
        let snapshot_id = Uuid::from_bytes(id_raw);

        let payload = &body[HEADER_LEN..];
        let expected = rows
            .checked_mul(dimensions)
            .and_then(|count| count.checked_mul(4));
        if dimensions == 0 || expected != Some(payload.len()) {
            return Err(IndexError::corrupt(
                path,
                format!(
                    "header declares {rows}x{dimensions} but payload holds {} bytes",
                    payload.len()
                ),
            ));
        }

        let values = payload
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();
        Ok(Self {
            dimensions,
            values,
            snapshot_id,
        })
    }
}

fn sha2_digest(bytes: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest(bytes).to_vec()
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let difference = a - b;
            difference * difference
        })
        .sum()
}

fn closest_first(left: &Neighbor, right: &Neighbor) -> Ordering {
    left.distance
        .total_cmp(&right.distance)
        .then(left.row.cmp(&right.row))
}

impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.values.len() / self.dimensions
    }

    fn add(&mut self, rows: &[f32]) -> Result<(), IndexError> {
        if rows.len() % self.dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: rows.len() % self.dimensions,
            });
        }
        self.values.extend_from_slice(rows);
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut scored = Vec::with_capacity(self.len());
        for (block, values) in self.values.chunks(self.dimensions * BLOCK_ROWS).enumerate() {
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    return Err(IndexError::Timeout(limit));
                }
            }
            let offset = block * BLOCK_ROWS;
            scored.extend(
                values
                    .chunks_exact(self.dimensions)
                    .enumerate()
                    .map(|(position, row)| Neighbor {
                        distance: squared_l2(query, row),
                        row: offset + position,
                    }),
            );
        }

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, closest_first);
            scored.truncate(k);
        }
        scored.sort_unstable_by(closest_first);
        Ok(scored)
    }
}

/// Builds a flat index from `embeddings`, inserting `batch_size` rows at a
/// time. Row `i` of the matrix is row `i` of the index.
///
/// Normalization here is a safety net: rows coming from the embedder are
/// already unit length and re-normalizing them leaves them unchanged.
pub fn build_index(
    mut embeddings: EmbeddingMatrix,
    options: &IndexOptions,
    snapshot_id: Uuid,
) -> Result<FlatIndex, IndexError> {
    let result = (|| {
        if options.batch_size == 0 {
            return Err(IndexError::InvalidOptions(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if embeddings.is_empty() {
            return Err(IndexError::EmptyEmbeddings);
        }

        if options.normalize {
            embeddings.normalize_rows();
            debug!("embeddings normalized for cosine similarity");
        }

        let mut index = FlatIndex::new(embeddings.dimensions(), snapshot_id)?;
        let batch_values = options.batch_size * embeddings.dimensions();
        for batch in embeddings.as_slice().chunks(batch_values) {
            index.add(batch)?;
        }
        Ok(index)
    })();

    match &result {
        Ok(index) => info!(
            rows = index.len(),
            dimensions = index.dimensions(),
            batch_size = options.batch_size,
            "index built"
        ),
        Err(build_error) => error!(error = %build_error, "failed to build index"),
    }
    result
}

pub fn build_and_save_index(
    embeddings: EmbeddingMatrix,
    options: &IndexOptions,
    snapshot_id: Uuid,
    path: &Path,
) -> Result<FlatIndex, IndexError> {
    let index = build_index(embeddings, options, snapshot_id)?;
    index.save(path)?;
    Ok(index)
}

/// Ranks the `k` rows nearest to `query`: rank 1 is the closest, `score` is
/// the squared distance and `row` addresses the chunk metadata.
pub fn search_index<I: VectorIndex>(
    index: &I,
    query: &[f32],
    k: usize,
    deadline: Option<Duration>,
) -> Result<Vec<SearchHit>, IndexError> {
    let neighbors = index.search(query, k, deadline).map_err(|search_error| {
        error!(k, rows = index.len(), error = %search_error, "index search failed");
        search_error
    })?;

    Ok(neighbors
        .into_iter()
        .enumerate()
        .map(|(position, neighbor)| SearchHit {
            rank: position + 1,
            score: neighbor.distance,
            row: neighbor.row,
        })
        .collect())
}
