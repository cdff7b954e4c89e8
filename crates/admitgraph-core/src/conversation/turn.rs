//! Turns and the local conversation transcript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::knowledge::RetrievalResult;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Delivery state of a turn
///
/// `Pending` moves to `Delivered` or `Failed` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Delivered => "delivered",
            TurnStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TurnStatus::Pending)
    }
}

/// One user or assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: TurnRole,
    pub content: String,
    status: TurnStatus,
    /// Knowledge attached to a delivered assistant turn
    pub knowledge: Option<RetrievalResult>,
    /// Failure message shown in place of content
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            status: TurnStatus::Pending,
            knowledge: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// A pending user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    /// A pending, empty assistant turn
    pub fn assistant() -> Self {
        Self::new(TurnRole::Assistant, String::new())
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Append streamed text to a pending turn
    pub fn push_fragment(&mut self, fragment: &str) -> Result<()> {
        self.ensure_pending("append to")?;
        self.content.push_str(fragment);
        Ok(())
    }

    /// Mark delivered, attaching optional knowledge
    pub fn deliver(&mut self, knowledge: Option<RetrievalResult>) -> Result<()> {
        self.ensure_pending("deliver")?;
        self.status = TurnStatus::Delivered;
        self.knowledge = knowledge;
        Ok(())
    }

    /// Mark failed with a user-facing message
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_pending("fail")?;
        self.status = TurnStatus::Failed;
        self.error = Some(message.into());
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        if self.status.is_final() {
            return Err(Error::InvalidTurnState(format!(
                "cannot {} turn {} in state '{}'",
                action,
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

/// Remote conversation id plus the local, ordered transcript
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Option<String>,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty transcript bound to a remote conversation
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            turns: Vec::new(),
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Append a turn, returning its index
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Turn> {
        self.turns.get_mut(index)
    }

    /// Index of the most recent failed turn
    pub fn last_failed(&self) -> Option<usize> {
        self.turns
            .iter()
            .rposition(|t| t.status() == TurnStatus::Failed)
    }

    /// Drop the turn at `index` and everything after it
    pub fn truncate_from(&mut self, index: usize) -> Vec<Turn> {
        if index >= self.turns.len() {
            return Vec::new();
        }
        self.turns.split_off(index)
    }
}
