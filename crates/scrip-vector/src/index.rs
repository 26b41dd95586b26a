//! Exact inner-product index over L2-normalized vectors.
//!
//! Vectors are stored row-major in one contiguous slab; row `i` belongs to
//! catalog record `i`. Every vector is normalized on insert and every query
//! is normalized before scoring, so the inner product is cosine similarity.
//! Equal scores are ordered by ascending row.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use scrip_core::deadline::Deadline;
use scrip_core::error::{Error, Result};

/// Rows scored between two deadline checks.
const DEADLINE_STRIDE: usize = 4096;

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut index = Self::new();
        index.insert_all(vectors)?;
        Ok(index)
    }

    /// Rebuild from raw parts already normalized (used by the file decoder).
    pub(crate) fn from_raw(dim: usize, data: Vec<f32>) -> Self {
        Self { dim, data }
    }

    pub(crate) fn raw(&self) -> &[f32] {
        &self.data
    }

    /// Replace the whole index. All vectors must share one dimension.
    pub fn insert_all(&mut self, vectors: Vec<Vec<f32>>) -> Result<()> {
        let dim = vectors.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(dim * vectors.len());
        for mut v in vectors {
            if v.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, got: v.len() });
            }
            l2_normalize(&mut v);
            data.extend_from_slice(&v);
        }
        self.dim = dim;
        self.data = data;
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        if row >= self.len() {
            return None;
        }
        Some(&self.data[row * self.dim..(row + 1) * self.dim])
    }

    /// Up to `k` `(row, score)` pairs, best first. An empty index yields nothing.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        self.query_with_deadline(vector, k, &Deadline::none())
    }

    pub fn query_with_deadline(&self, vector: &[f32], k: usize, deadline: &Deadline) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, got: vector.len() });
        }
        let mut query = vector.to_vec();
        l2_normalize(&mut query);

        let k = k.min(self.len());
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (row, chunk) in self.data.chunks_exact(self.dim).enumerate() {
            if row % DEADLINE_STRIDE == 0 {
                deadline.check()?;
            }
            heap.push(std::cmp::Reverse(Scored { score: dot_product(chunk, &query), row }));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut hits: Vec<Scored> = heap.into_iter().map(|r| r.0).collect();
        hits.sort_by(|a, b| b.cmp(a));
        Ok(hits.into_iter().map(|s| (s.row, s.score)).collect())
    }
}

/// Greater means better: higher score, then lower row.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    row: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.row.cmp(&self.row))
    }
}
