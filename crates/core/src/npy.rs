//! Minimal reader/writer for 2D little-endian `f32` arrays in the NumPy
//! `.npy` format, so embedding artifacts stay loadable with `numpy.load`.

use crate::error::StoreError;
use crate::models::EmbeddingMatrix;
use regex::Regex;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

pub fn encode(matrix: &EmbeddingMatrix) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.rows(),
        matrix.dimensions()
    );
    // magic + version + u16 length + header + newline
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut bytes = Vec::with_capacity(unpadded + padding + matrix.as_slice().len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for value in matrix.as_slice() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode(bytes: &[u8]) -> Result<EmbeddingMatrix, StoreError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Npy("missing npy magic".to_string()));
    }

    let major = bytes[MAGIC.len()];
    let (header_len, header_start) = match major {
        1 => (read_le(bytes, 8, 2)?, 10),
        2 | 3 => (read_le(bytes, 8, 4)?, 12),
        other => return Err(StoreError::Npy(format!("unsupported npy version {other}"))),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or_else(|| StoreError::Npy("truncated header".to_string()))?;
    let header = std::str::from_utf8(header)
        .map_err(|error| StoreError::Npy(format!("header is not text: {error}")))?;

    let (rows, dimensions) = parse_header(header)?;
    let payload = &bytes[data_start.min(bytes.len())..];
    let expected = rows
        .checked_mul(dimensions)
        .and_then(|count| count.checked_mul(4))
        .ok_or_else(|| StoreError::Npy("shape overflows".to_string()))?;
    if payload.len() != expected {
        return Err(StoreError::Npy(format!(
            "payload holds {} bytes, shape ({rows}, {dimensions}) needs {expected}",
            payload.len()
        )));
    }

    let values = payload
        .chunks_exact(4)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect();
    EmbeddingMatrix::from_flat(rows, dimensions, values)
}

fn read_le(bytes: &[u8], offset: usize, width: usize) -> Result<usize, StoreError> {
    let raw = bytes
        .get(offset..offset + width)
        .ok_or_else(|| StoreError::Npy("truncated header length".to_string()))?;
    Ok(raw
        .iter()
        .rev()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize))
}

fn parse_header(header: &str) -> Result<(usize, usize), StoreError> {
    let descr = Regex::new(r"'descr':\s*'([^']*)'").map_err(regex_error)?;
    let order = Regex::new(r"'fortran_order':\s*(True|False)").map_err(regex_error)?;
    let shape = Regex::new(r"'shape':\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)").map_err(regex_error)?;

    match descr.captures(header).and_then(|found| found.get(1)) {
        Some(found) if found.as_str() == "<f4" => {}
        Some(found) => {
            return Err(StoreError::Npy(format!(
                "expected dtype '<f4', found '{}'",
                found.as_str()
            )))
        }
        None => return Err(StoreError::Npy("header has no descr".to_string())),
    }

    let fortran_order = order
        .captures(header)
        .and_then(|found| found.get(1))
        .map(|found| found.as_str());
    if fortran_order != Some("False") {
        return Err(StoreError::Npy("only C-order arrays are supported".to_string()));
    }

    let captures = shape
        .captures(header)
        .ok_or_else(|| StoreError::Npy("expected a 2D shape".to_string()))?;
    let dimension = |group: usize| -> Result<usize, StoreError> {
        captures
            .get(group)
            .map(|found| found.as_str())
            .unwrap_or_default()
            .parse()
            .map_err(|error| StoreError::Npy(format!("bad shape: {error}")))
    };
    Ok((dimension(1)?, dimension(2)?))
}

fn regex_error(error: regex::Error) -> StoreError {
    StoreError::Npy(error.to_string())
}
