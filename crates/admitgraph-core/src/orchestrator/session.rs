//! Interactive chat session over one conversation

use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::conversation::{Conversation, Turn, TurnRole};
use crate::error::{Error, Result};

use super::handler::{TurnEvent, TurnOrchestrator};

/// A transcript of turns driven through a [`TurnOrchestrator`]
///
/// Turns are sent one at a time: `send` borrows the session mutably until
/// its stream is dropped.
pub struct ChatSession {
    orchestrator: TurnOrchestrator,
    conversation: Conversation,
}

impl ChatSession {
    /// Initialize the agent and open the remote conversation
    pub async fn start(orchestrator: TurnOrchestrator) -> Result<Self> {
        let client = orchestrator.client();
        client.initialize().await?;
        let id = client.create_conversation().await?.to_string();
        info!(conversation = %id, "Chat session started");

        Ok(Self {
            orchestrator,
            conversation: Conversation::with_id(id),
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Display name of the conversation agent
    pub fn agent_name(&self) -> &str {
        self.orchestrator
            .client()
            .agent()
            .map(|a| a.display_name())
            .unwrap_or("assistant")
    }

    pub fn can_regenerate(&self) -> bool {
        self.conversation.last_failed().is_some()
    }

    /// Record `text` as a user turn and stream the assistant's reply
    ///
    /// The final event's turn is appended to the transcript before it is
    /// yielded.
    pub fn send(
        &mut self,
        text: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = TurnEvent> + Send + '_ {
        let text = text.into();

        async_stream::stream! {
            let mut user = Turn::user(text.clone());
            // A fresh turn is always pending
            let _ = user.deliver(None);
            self.conversation.push(user);

            let events = self.orchestrator.handle(text, cancel);
            futures_util::pin_mut!(events);
            while let Some(event) = events.next().await {
                match &event {
                    TurnEvent::Delivered(turn) | TurnEvent::Failed { turn, .. } => {
                        self.conversation.push(turn.clone());
                    }
                    TurnEvent::Fragment(_) => {}
                }
                yield event;
            }
        }
    }

    /// Discard the last failed turn, every turn after it, and the user turn
    /// that prompted it, then resubmit that user text
    pub fn regenerate(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = TurnEvent> + Send + '_> {
        let failed = self.conversation.last_failed().ok_or_else(|| {
            Error::InvalidTurnState("there is no failed turn to regenerate".to_string())
        })?;

        let origin = self.conversation.turns()[..failed]
            .iter()
            .rposition(|t| t.role == TurnRole::User)
            .ok_or_else(|| {
                Error::InvalidTurnState("failed turn has no originating user turn".to_string())
            })?;

        let text = self.conversation.turns()[origin].content.clone();
        let discarded = self.conversation.truncate_from(origin);
        info!(discarded = discarded.len(), "Regenerating failed turn");

        Ok(self.send(text, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversationConfig;
    use crate::conversation::{ConversationClient, RunStatus, TurnStatus};
    use crate::testing::{AttemptScript, Call, ScriptedConversation};
    use std::sync::Arc;

    async fn session(provider: Arc<ScriptedConversation>) -> ChatSession {
        let settings = ConversationConfig {
            max_retries: 0,
            ..ConversationConfig::default()
        };
        let client = ConversationClient::new(provider, "asst_test", settings);
        ChatSession::start(TurnOrchestrator::new(client)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_records_both_turns() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::Completed],
            "The admit rate is 42 percent",
        )]));
        let mut session = session(provider).await;
        assert_eq!(session.agent_name(), "Admissions Helper");
        assert_eq!(session.conversation().id.as_deref(), Some("thread_test"));

        let events: Vec<_> = session.send("admit rate?", CancellationToken::new()).collect().await;
        assert!(events.last().is_some_and(TurnEvent::is_final));

        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].status(), TurnStatus::Delivered);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[1].content, "The admit rate is 42 percent ");
        assert!(!session.can_regenerate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_regenerate_replaces_failed_turn() {
        let provider = Arc::new(ScriptedConversation::new(vec![
            AttemptScript::completes(vec![RunStatus::Completed], "first answer"),
            AttemptScript::completes(vec![RunStatus::RequiresAction], "unused"),
            AttemptScript::completes(vec![RunStatus::Completed], "second answer"),
        ]));
        let mut session = session(provider.clone()).await;

        let _: Vec<_> = session.send("first", CancellationToken::new()).collect().await;
        let _: Vec<_> = session.send("second", CancellationToken::new()).collect().await;
        assert_eq!(session.conversation().turns().len(), 4);
        assert!(session.can_regenerate());

        let events: Vec<_> = session
            .regenerate(CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        assert!(matches!(events.last(), Some(TurnEvent::Delivered(_))));

        let turns = session.conversation().turns();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["first", "first answer ", "second", "second answer "]
        );
        assert!(turns.iter().all(|t| t.status() == TurnStatus::Delivered));
        assert_eq!(provider.count(Call::CreateConversation), 1);
    }

    #[tokio::test]
    async fn test_regenerate_without_failure_is_rejected() {
        let provider = Arc::new(ScriptedConversation::new(vec![]));
        let mut session = session(provider).await;

        assert!(matches!(
            session.regenerate(CancellationToken::new()),
            Err(Error::InvalidTurnState(_))
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_agent_unreachable() {
        let provider = Arc::new(ScriptedConversation::new(vec![]).unreachable());
        let client = ConversationClient::new(provider, "asst_test", ConversationConfig::default());

        let result = ChatSession::start(TurnOrchestrator::new(client)).await;
        assert!(matches!(result, Err(Error::Initialization(_))));
    }
}
