//! In-memory similarity index over named embedding vectors
//!
//! Queries are an exhaustive cosine scan, O(N·D) per query. The corpus is a
//! bounded set of dataset fields, so no auxiliary index structure is kept.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// A stored name scored against a query vector
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub name: String,
    /// Position of the name in corpus order
    pub position: usize,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

#[derive(Debug)]
struct Entries {
    names: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
}

/// Write-once store of `(name, vector)` pairs in corpus order
///
/// Read-only after [`load`](Self::load); safe to share across tasks.
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    entries: OnceLock<Entries>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the index
    ///
    /// `ordered_names` fixes corpus order and must name exactly the keys of
    /// `vectors_by_name`. Returns `false` without touching either input when
    /// the index is already loaded.
    pub fn load(
        &self,
        mut vectors_by_name: HashMap<String, Vec<f32>>,
        ordered_names: Vec<String>,
    ) -> Result<bool> {
        if self.is_loaded() {
            debug!("Similarity index already loaded, skipping");
            return Ok(false);
        }

        if ordered_names.is_empty() {
            return Err(Error::DataLoad("node name list is empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(ordered_names.len());
        for name in &ordered_names {
            if !seen.insert(name.as_str()) {
                return Err(Error::DataLoad(format!("duplicate node name '{}'", name)));
            }
            if !vectors_by_name.contains_key(name) {
                return Err(Error::DataLoad(format!("node '{}' has no embedding", name)));
            }
        }
        if let Some(orphan) = vectors_by_name.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(Error::DataLoad(format!(
                "embedding '{}' has no entry in the node list",
                orphan
            )));
        }

        let mut vectors = Vec::with_capacity(ordered_names.len());
        for name in &ordered_names {
            // presence checked above
            let Some(vector) = vectors_by_name.remove(name) else {
                continue;
            };
            vectors.push(vector);
        }

        let dimension = vectors[0].len();
        if dimension == 0 {
            return Err(Error::DataLoad("embedding vectors are empty".to_string()));
        }
        if let Some((name, vector)) = ordered_names
            .iter()
            .zip(&vectors)
            .find(|(_, v)| v.len() != dimension)
        {
            return Err(Error::DataLoad(format!(
                "embedding '{}' has dimension {}, expected {}",
                name,
                vector.len(),
                dimension
            )));
        }

        let count = ordered_names.len();
        let loaded = self
            .entries
            .set(Entries {
                names: ordered_names,
                vectors,
                dimension,
            })
            .is_ok();

        if loaded {
            info!(nodes = count, dimension, "Similarity index loaded");
        }
        Ok(loaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.get().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.get().map_or(0, |e| e.names.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension, once loaded
    pub fn dimension(&self) -> Option<usize> {
        self.entries.get().map(|e| e.dimension)
    }

    /// Names in corpus order
    pub fn names(&self) -> &[String] {
        self.entries.get().map_or(&[], |e| e.names.as_slice())
    }

    /// The `k` stored names most similar to `query`
    ///
    /// Sorted by similarity descending; equal scores keep corpus order.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let entries = self
            .entries
            .get()
            .ok_or_else(|| Error::DataLoad("similarity index has not been loaded".to_string()))?;

        if query.len() != entries.dimension {
            return Err(Error::DimensionMismatch {
                expected: entries.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = entries
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, cosine_similarity(query, vector)))
            .collect();

        // stable sort keeps corpus order among ties
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, similarity)| Neighbor {
                name: entries.names[position].clone(),
                position,
                similarity,
            })
            .collect())
    }
}

/// Cosine similarity of two equal-length vectors, clamped to [-1, 1]
///
/// A zero-magnitude operand scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    (dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0)
}
