//! Provider seams
//!
//! The conversation client and retrieval engine talk to remote services only
//! through these traits. [`OpenAiClient`](super::OpenAiClient) implements all
//! three over HTTP; tests substitute scripted in-memory fakes.

use async_trait::async_trait;

use crate::conversation::RunStatus;
use crate::error::Result;

use super::types::MessageRole;

/// Metadata describing the hosted conversation agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub id: String,
    /// Display name, when the provider has one
    pub name: Option<String>,
}

impl AgentInfo {
    /// Name to show users, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One observation of a remote run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub id: String,
    pub status: RunStatus,
    /// Provider-supplied failure detail for terminal failures
    pub detail: Option<String>,
}

/// A message read back from a remote conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub text: String,
}

/// Remote host of multi-step conversational inference
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// Fetch agent metadata by id
    async fn retrieve_agent(&self, agent_id: &str) -> Result<AgentInfo>;

    /// Open a new conversation, returning its id
    async fn create_conversation(&self) -> Result<String>;

    /// Append a user turn to a conversation
    async fn append_user_message(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// Start a run of `agent_id` over the conversation
    async fn create_run(&self, conversation_id: &str, agent_id: &str) -> Result<RunSnapshot>;

    /// Observe the current state of a run
    async fn retrieve_run(&self, conversation_id: &str, run_id: &str) -> Result<RunSnapshot>;

    /// Most recent message of the conversation, if any
    async fn latest_message(&self, conversation_id: &str) -> Result<Option<ConversationMessage>>;
}

/// Text to fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Single-turn text completion
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
