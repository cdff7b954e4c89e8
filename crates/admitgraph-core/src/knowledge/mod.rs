//! Knowledge retrieval over the admissions field corpus
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ KnowledgeArtifacts (embeddings.json + node_names.txt)        │
//! │        └─► SimilarityIndex::load (write-once, corpus order)  │
//! └──────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RetrievalEngine::query                                       │
//! │   embed ─► top_k cosine scan ─► NodeEnricher ─► ranked nodes │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let index = Arc::new(SimilarityIndex::new());
//! KnowledgeArtifacts::from_paths(&embeddings, &names)?.load_into(&index)?;
//!
//! let engine = RetrievalEngine::new(embedder, index).with_top_k(5);
//! let result = engine.query("admission rate").await?;
//! println!("{}", result);
//! ```

mod artifacts;
mod engine;
mod index;
mod node;

pub use artifacts::KnowledgeArtifacts;
pub use engine::{DEFAULT_TOP_K, KnowledgeAnswer, RetrievalEngine, RetrievalResult, ScoredNode};
pub use index::{Neighbor, SimilarityIndex, cosine_similarity};
pub use node::{
    DIRECTORY_TARGET, KnowledgeNode, NodeEnricher, NodeFormat, NodeType, Relationship,
    RelationshipType, SOURCE_TARGET,
};
