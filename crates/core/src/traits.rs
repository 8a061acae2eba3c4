use crate::error::IndexError;
use std::time::Duration;

/// A stored row and its distance to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub row: usize,
}

/// Row-addressed nearest-neighbour index.
///
/// Rows keep the position they were inserted at; that position is the only
/// link back to chunk metadata.
pub trait VectorIndex {
    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a row-major batch after the existing rows.
    fn add(&mut self, rows: &[f32]) -> Result<(), IndexError>;

    /// Returns up to `k` rows ordered by ascending distance.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<Neighbor>, IndexError>;
}
