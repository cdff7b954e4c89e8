//! Hosted conversations: run lifecycle, turns, and reply streaming
//!
//! [`ConversationClient`] owns the remote side (agent, conversation id,
//! run polling and retries). [`Conversation`] and [`Turn`] are the local
//! transcript that the orchestrator fills in as replies arrive.

mod chunk;
mod client;
mod run;
mod turn;

pub use chunk::chunk_words;
pub use client::ConversationClient;
pub use run::RunStatus;
pub use turn::{Conversation, Turn, TurnRole, TurnStatus};
