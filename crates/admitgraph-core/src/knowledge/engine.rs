//! Retrieval engine: embed a query, rank nodes, enrich them
//!
//! ```text
//! text ─► EmbeddingProvider ─► SimilarityIndex::top_k ─► NodeEnricher ─► RetrievalResult
//!                                                                  └─► (optional) synthesis
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::{CompletionProvider, EmbeddingProvider};

use super::index::SimilarityIndex;
use super::node::{KnowledgeNode, NodeEnricher};

/// Default retrieval breadth
pub const DEFAULT_TOP_K: usize = 5;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You explain admissions dataset fields. \
Using only the knowledge graph context provided as JSON, answer the user's question \
in two or three sentences and mention the most relevant fields by label.";

/// An enriched node with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    #[serde(flatten)]
    pub node: KnowledgeNode,
    pub similarity: f32,
}

/// Ranked nodes, similarity descending, ties in corpus order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalResult {
    nodes: Vec<ScoredNode>,
}

impl RetrievalResult {
    pub fn new(nodes: Vec<ScoredNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[ScoredNode] {
        &self.nodes
    }

    pub fn top(&self) -> Option<&ScoredNode> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// JSON context handed to the synthesis completion
    pub fn to_context_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.nodes)?)
    }
}

impl fmt::Display for RetrievalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, scored) in self.nodes.iter().enumerate() {
            writeln!(
                f,
                "{}. {} [{}] {:.3}",
                rank + 1,
                scored.node.label,
                scored.node.format,
                scored.similarity
            )?;
            for edge in &scored.node.relationships {
                writeln!(f, "     {} -> {}", edge.relationship_type, edge.target)?;
            }
        }
        Ok(())
    }
}

/// Retrieval result plus an optional natural-language summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeAnswer {
    pub result: RetrievalResult,
    pub synthesis: Option<String>,
}

/// Looks up knowledge relevant to a query
///
/// Holds no per-call mutable state; independent queries may run concurrently.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<SimilarityIndex>,
    enricher: NodeEnricher,
    completer: Option<Arc<dyn CompletionProvider>>,
    top_k: usize,
}

impl fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("nodes", &self.index.len())
            .field("top_k", &self.top_k)
            .field("synthesis", &self.completer.is_some())
            .finish()
    }
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<SimilarityIndex>) -> Self {
        Self {
            embedder,
            index,
            enricher: NodeEnricher::new(),
            completer: None,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Set retrieval breadth
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Enable synthesis through a completion provider
    pub fn with_completer(mut self, completer: Arc<dyn CompletionProvider>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `text` and return the enriched top-k nodes
    ///
    /// Embedding failures surface as [`Error::Embedding`] without retry.
    pub async fn query(&self, text: &str) -> Result<RetrievalResult> {
        let embedding = self.embedder.embed(text).await.map_err(|e| match e {
            Error::Embedding(_) => e,
            other => Error::Embedding(other.to_string()),
        })?;

        let neighbors = self.index.top_k(&embedding, self.top_k)?;

        let nodes: Vec<ScoredNode> = neighbors
            .into_iter()
            .map(|n| ScoredNode {
                node: self.enricher.enrich(&n.name),
                similarity: n.similarity,
            })
            .collect();

        debug!(
            query = %text,
            results = nodes.len(),
            top = nodes.first().map(|n| n.node.name.as_str()).unwrap_or(""),
            "Retrieval completed"
        );

        Ok(RetrievalResult::new(nodes))
    }

    /// Summarise `result` for `text` with the completion provider
    pub async fn synthesize(&self, text: &str, result: &RetrievalResult) -> Result<String> {
        let completer = self
            .completer
            .as_ref()
            .ok_or_else(|| Error::Config("no completion provider configured".to_string()))?;

        let user = format!(
            "Knowledge graph context:\n{}\n\nQuestion: {}",
            result.to_context_json()?,
            text
        );
        completer.complete(SYNTHESIS_SYSTEM_PROMPT, &user).await
    }

    /// Query, then synthesise when a completer is configured
    ///
    /// A synthesis failure is logged and leaves the node list intact.
    pub async fn query_with_synthesis(&self, text: &str) -> Result<KnowledgeAnswer> {
        let result = self.query(text).await?;

        let synthesis = if self.completer.is_some() && !result.is_empty() {
            match self.synthesize(text, &result).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(error = %e, "Knowledge synthesis failed, keeping node list");
                    None
                }
            }
        } else {
            None
        };

        info!(
            results = result.len(),
            synthesized = synthesis.is_some(),
            "Knowledge lookup finished"
        );

        Ok(KnowledgeAnswer { result, synthesis })
    }
}
