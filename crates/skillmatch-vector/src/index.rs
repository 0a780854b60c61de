//! Flat (brute-force) vector index with exact squared-L2 search.
//!
//! Vectors are stored contiguously; a vector's position (slot) is its
//! identity and the join key into the catalog metadata. Search is an exact
//! linear scan. No approximate structure is used, so distances are the true
//! squared Euclidean distances callers rank and threshold on.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use skillmatch_core::error::{Result, SkillmatchError};

/// Leading bytes of a serialized index.
const INDEX_MAGIC: [u8; 4] = *b"SMIX";
const INDEX_FORMAT_VERSION: u32 = 1;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Zero-based slot of the matching vector.
    pub slot: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// In-memory flat index over vectors of one fixed dimension.
///
/// Not internally synchronized: catalogs keep an index inside an immutable
/// snapshot and replace the whole snapshot on mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u32,
    dimension: u64,
    count: u64,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create a new empty index for vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors stored.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector stored at `slot`, if any.
    pub fn vector(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Append vectors in input order.
    ///
    /// Every vector is validated before any is stored: on
    /// `DimensionMismatch` the index is unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(SkillmatchError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Return the `k` nearest vectors by ascending squared L2 distance.
    ///
    /// Returns `min(k, len)` hits. Equal distances are ordered by slot, so
    /// results are fully deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(SkillmatchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(slot, vector)| Neighbor {
                slot,
                distance: squared_l2(query, vector),
            })
            .collect();

        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, compare_neighbors);
            hits.truncate(k);
        }
        hits.sort_by(compare_neighbors);
        Ok(hits)
    }

    /// Serialize to the on-disk byte format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let file = IndexFile {
            magic: INDEX_MAGIC,
            version: INDEX_FORMAT_VERSION,
            dimension: self.dimension as u64,
            count: self.len() as u64,
            data: self.data.clone(),
        };
        Ok(bincode::serialize(&file)?)
    }

    /// Deserialize from bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: IndexFile = bincode::deserialize(bytes)?;
        if file.magic != INDEX_MAGIC {
            return Err(SkillmatchError::Persistence(
                "not a skillmatch index file".to_string(),
            ));
        }
        if file.version != INDEX_FORMAT_VERSION {
            return Err(SkillmatchError::Persistence(format!(
                "unsupported index format version {}",
                file.version
            )));
        }
        let dimension = file.dimension as usize;
        let expected_len = (file.count as usize).checked_mul(dimension);
        if dimension == 0 || expected_len != Some(file.data.len()) {
            return Err(SkillmatchError::Persistence(format!(
                "index header says {} x {} but holds {} floats",
                file.count,
                file.dimension,
                file.data.len()
            )));
        }
        Ok(Self {
            dimension,
            data: file.data,
        })
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.slot.cmp(&b.slot))
}

/// Squared Euclidean distance. Callers guarantee equal lengths.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
