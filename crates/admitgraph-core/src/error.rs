//! Error types for Admitgraph

use thiserror::Error;

use crate::conversation::RunStatus;

/// Result type alias using Admitgraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Admitgraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Conversation lifecycle errors (E001-E099)
    #[error("Initialization failed: {0}. Check ADMITGRAPH_API_KEY and ADMITGRAPH_ASSISTANT_ID.")]
    Initialization(String),

    #[error("Could not create conversation: {0}")]
    ConversationCreate(String),

    #[error("Run ended in state '{state}': {reason}")]
    Run { state: RunStatus, reason: String },

    #[error("Run did not complete within {0} seconds")]
    Timeout(u64),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Giving up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Turn state error: {0}")]
    InvalidTurnState(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    Network(#[from] reqwest::Error),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Completion failed: {0}")]
    Completion(String),

    // Retrieval errors (E200-E299)
    #[error("Knowledge data failed to load: {0}")]
    DataLoad(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "E001",
            Self::ConversationCreate(_) => "E002",
            Self::Run { .. } => "E003",
            Self::Timeout(_) => "E004",
            Self::Cancelled => "E005",
            Self::RetryExhausted { .. } => "E006",
            Self::Protocol(_) => "E007",
            Self::InvalidTurnState(_) => "E008",
            Self::Network(_) => "E100",
            Self::Provider { .. } => "E101",
            Self::RateLimited(_) => "E102",
            Self::Completion(_) => "E103",
            Self::DataLoad(_) => "E200",
            Self::Embedding(_) => "E201",
            Self::DimensionMismatch { .. } => "E202",
            Self::Config(_) => "E600",
            Self::Json(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Initialization(_) => {
                Some("export ADMITGRAPH_API_KEY=... ADMITGRAPH_ASSISTANT_ID=...".to_string())
            }
            Self::Network(_) => Some("Check internet connection".to_string()),
            Self::DataLoad(_) | Self::DimensionMismatch { .. } => {
                Some("admitgraph config get retrieval.embeddings_path".to_string())
            }
            Self::RetryExhausted { .. } | Self::Run { .. } | Self::Timeout(_) => {
                Some("Type /regenerate to try the turn again".to_string())
            }
            Self::Config(_) => Some("admitgraph config list".to_string()),
            _ => None,
        }
    }

    /// Whether another attempt at the same turn could plausibly succeed.
    ///
    /// Deterministic run outcomes (`requires_action`, a remote `cancelled`)
    /// and local misconfiguration are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::RateLimited(_)
            | Self::Timeout(_)
            | Self::Protocol(_)
            | Self::ConversationCreate(_)
            | Self::Completion(_)
            | Self::Embedding(_) => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            Self::Run { state, .. } => state.is_transient_failure(),
            Self::Initialization(_)
            | Self::Cancelled
            | Self::RetryExhausted { .. }
            | Self::InvalidTurnState(_)
            | Self::DataLoad(_)
            | Self::DimensionMismatch { .. }
            | Self::Config(_)
            | Self::Json(_)
            | Self::Io(_) => false,
        }
    }

    /// True for a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
