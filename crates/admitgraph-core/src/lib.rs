//! Admitgraph Core Library
//!
//! This crate provides the knowledge-augmented conversation pipeline:
//! - Conversation runs (create, poll, retry with backoff, cancel, paced streaming)
//! - Knowledge retrieval (similarity index, node enrichment, optional synthesis)
//! - Turn orchestration (reply stream and lookup merged into one turn)
//! - LLM integration (OpenAI-compatible API behind provider traits)
//! - Configuration and the error taxonomy

pub mod config;
pub mod conversation;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::conversation::{ConversationClient, RunStatus, Turn, TurnStatus};
    pub use crate::error::{Error, Result};
    pub use crate::knowledge::{KnowledgeArtifacts, RetrievalEngine, RetrievalResult, SimilarityIndex};
    pub use crate::orchestrator::{ChatSession, TurnEvent, TurnOrchestrator};
}
