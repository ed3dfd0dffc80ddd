//! In-memory similarity index over embedded chunks.
//!
//! Embeddings are stored as one contiguous f16 block (row-major, one row per
//! chunk), which is both cache-friendly for the brute-force scan and exactly
//! the byte layout persisted to disk. Search computes full cosine similarity
//! rather than assuming unit-norm inputs, so indices built from differently
//! configured providers still rank correctly.

use half::f16;
use serde::{Deserialize, Serialize};

/// A searchable chunk: where it came from and its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    /// Source path relative to the document root, forward-slash normalized.
    pub source: String,
    /// Chunk text.
    pub content: String,
}

/// A retrieval hit with its measured similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Cosine similarity of the chunk against the query embedding.
    pub score: f32,
    pub chunk: IndexedChunk,
}

/// Brute-force cosine-similarity index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    chunks: Vec<IndexedChunk>,
    /// Row-major embedding block, `chunks.len() * dimension` values.
    embeddings: Vec<f16>,
    dimension: usize,
}

impl VectorIndex {
    /// Build an index from chunks and their embeddings (one per chunk, all of
    /// equal dimension).
    pub fn new(
        chunks: Vec<IndexedChunk>,
        rows: Vec<Vec<f16>>,
    ) -> std::result::Result<Self, String> {
        if chunks.len() != rows.len() {
            return Err(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                rows.len()
            ));
        }
        let dimension = rows.first().map(|r| r.len()).unwrap_or(0);
        if dimension == 0 && !chunks.is_empty() {
            return Err("zero-dimensional embeddings".to_string());
        }
        let mut embeddings = Vec::with_capacity(chunks.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(format!(
                    "embedding {} has dimension {}, expected {dimension}",
                    i,
                    row.len()
                ));
            }
            embeddings.extend_from_slice(row);
        }
        Ok(Self {
            chunks,
            embeddings,
            dimension,
        })
    }

    /// Reassemble an index from its persisted parts: chunk records plus the
    /// raw little-endian f16 embedding block.
    pub fn from_stored(
        chunks: Vec<IndexedChunk>,
        embedding_bytes: &[u8],
        dimension: usize,
    ) -> std::result::Result<Self, String> {
        let expected = chunks.len() * dimension * std::mem::size_of::<f16>();
        if embedding_bytes.len() != expected {
            return Err(format!(
                "embedding block is {} bytes, expected {expected}",
                embedding_bytes.len()
            ));
        }
        // Decode per value rather than casting the slice: the byte buffer
        // carries no alignment guarantee.
        let embeddings: Vec<f16> = embedding_bytes
            .chunks_exact(2)
            .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self {
            chunks,
            embeddings,
            dimension,
        })
    }

    /// Raw bytes of the embedding block, suitable for [`Self::from_stored`].
    pub fn embedding_bytes(&self) -> &[u8] {
        bytemuck::cast_slice::<f16, u8>(&self.embeddings)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    /// Return the `top_k` chunks most similar to `query`, best first.
    pub fn search(&self, query: &[f16], top_k: usize) -> Vec<ScoredChunk> {
        if top_k == 0 || self.is_empty() || query.len() != self.dimension {
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = (0..self.chunks.len())
            .map(|i| {
                let row = &self.embeddings[i * self.dimension..(i + 1) * self.dimension];
                (cosine_similarity(query, row), i)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, i)| ScoredChunk {
                score,
                chunk: self.chunks[i].clone(),
            })
            .collect()
    }
}

/// Cosine similarity between two f16 vectors.
fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();
    let norm_a: f32 = a.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
