//! LLM integration - OpenAI-compatible API
//!
//! This module provides:
//! - Provider traits for conversations, embeddings, and completions
//! - An HTTP client implementing all three
//! - Request/response wire types

mod client;
mod provider;
mod types;

pub use client::{OpenAiClient, OpenAiClientBuilder};
pub use provider::{
    AgentInfo, CompletionProvider, ConversationMessage, ConversationProvider, EmbeddingProvider,
    RunSnapshot,
};
pub use types::{Message, MessageRole};
