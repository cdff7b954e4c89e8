//! Conversation client: drives one remote run per turn to completion
//!
//! A turn is one *attempt loop* wrapped around a *poll loop*:
//!
//! 1. append the user text, create a run
//! 2. poll the run every `poll_interval` until it is terminal, the run
//!    deadline passes, or the caller cancels
//! 3. read back the newest assistant message
//!
//! Retryable failures restart the whole attempt after `backoff_base * 2^n`.
//! All retry bookkeeping lives in a per-call [`TurnAttempt`], so the client
//! itself carries no mutable retry state.

use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConversationConfig;
use crate::error::{Error, Result};
use crate::llm::{AgentInfo, ConversationProvider, MessageRole};

use super::chunk::chunk_words;

/// Bookkeeping for one attempt of one `send_turn` call
#[derive(Debug)]
struct TurnAttempt<'a> {
    /// 0 for the first attempt
    retry: u32,
    /// Absolute run deadline, fixed when the run is created
    deadline: Option<Instant>,
    cancel: &'a CancellationToken,
}

impl<'a> TurnAttempt<'a> {
    fn first(cancel: &'a CancellationToken) -> Self {
        Self {
            retry: 0,
            deadline: None,
            cancel,
        }
    }

    fn next(self) -> Self {
        Self {
            retry: self.retry + 1,
            deadline: None,
            cancel: self.cancel,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }
}

/// Client for a single hosted conversation
pub struct ConversationClient {
    provider: Arc<dyn ConversationProvider>,
    agent_id: String,
    settings: ConversationConfig,
    agent: OnceCell<AgentInfo>,
    conversation_id: OnceCell<String>,
}

impl std::fmt::Debug for ConversationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationClient")
            .field("agent_id", &self.agent_id)
            .field("initialized", &self.agent.initialized())
            .field("conversation_id", &self.conversation_id.get())
            .finish()
    }
}

impl ConversationClient {
    pub fn new(
        provider: Arc<dyn ConversationProvider>,
        agent_id: impl Into<String>,
        settings: ConversationConfig,
    ) -> Self {
        Self {
            provider,
            agent_id: agent_id.into(),
            settings,
            agent: OnceCell::new(),
            conversation_id: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &ConversationConfig {
        &self.settings
    }

    /// Agent metadata, once initialized
    pub fn agent(&self) -> Option<&AgentInfo> {
        self.agent.get()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.get().map(String::as_str)
    }

    /// Fetch agent metadata; must precede [`create_conversation`](Self::create_conversation)
    pub async fn initialize(&self) -> Result<&AgentInfo> {
        if self.agent_id.trim().is_empty() {
            return Err(Error::Initialization("no assistant id configured".to_string()));
        }

        self.agent
            .get_or_try_init(|| async {
                let agent = self
                    .provider
                    .retrieve_agent(&self.agent_id)
                    .await
                    .map_err(|e| match e {
                        Error::Initialization(_) => e,
                        other => Error::Initialization(other.to_string()),
                    })?;
                info!(agent = %agent.display_name(), "Conversation agent ready");
                Ok::<_, Error>(agent)
            })
            .await
    }

    /// Open the client's conversation; later calls return the same id
    pub async fn create_conversation(&self) -> Result<&str> {
        if !self.agent.initialized() {
            return Err(Error::Initialization(
                "initialize() must succeed before a conversation is created".to_string(),
            ));
        }

        let id = self
            .conversation_id
            .get_or_try_init(|| async {
                let id = self
                    .provider
                    .create_conversation()
                    .await
                    .map_err(|e| Error::ConversationCreate(e.to_string()))?;
                info!(conversation = %id, "Conversation created");
                Ok::<_, Error>(id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Submit `text` as a user turn and stream the reply in paced fragments
    ///
    /// The stream ends after the last fragment or at the first error. Each
    /// call starts a fresh run; one turn per client may be in flight.
    pub fn send_turn(
        &self,
        text: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<String>> + Send + '_ {
        let text = text.into();

        async_stream::try_stream! {
            let reply = self.run_turn(&text, &cancel).await?;
            let fragments = chunk_words(&reply, self.settings.chunk_words);
            debug!(fragments = fragments.len(), "Streaming reply");

            for fragment in fragments {
                sleep_or_cancel(self.settings.pacing(), &cancel).await?;
                yield fragment;
            }
        }
    }

    /// Attempt loop: run the turn, retrying with exponential backoff
    async fn run_turn(&self, text: &str, cancel: &CancellationToken) -> Result<String> {
        let conversation_id = self.conversation_id().ok_or_else(|| {
            Error::InvalidTurnState("create_conversation() must succeed before sending".to_string())
        })?;
        let mut attempt = TurnAttempt::first(cancel);

        loop {
            attempt.ensure_live()?;

            let err = match self.attempt_turn(conversation_id, text, &mut attempt).await {
                Ok(reply) => {
                    info!(attempt = attempt.retry + 1, chars = reply.len(), "Turn completed");
                    return Ok(reply);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => e,
            };

            if !self.should_retry(&err) {
                warn!(error = %err, "Turn failed with a non-retryable error");
                return Err(err);
            }

            if attempt.retry >= self.settings.max_retries {
                warn!(attempts = attempt.retry + 1, error = %err, "Turn retries exhausted");
                return Err(Error::RetryExhausted {
                    attempts: attempt.retry + 1,
                    source: Box::new(err),
                });
            }

            let backoff = self.settings.backoff(attempt.retry);
            warn!(
                attempt = attempt.retry + 1,
                wait_ms = backoff.as_millis() as u64,
                error = %err,
                "Turn failed, retrying after backoff"
            );
            sleep_or_cancel(backoff, attempt.cancel).await?;
            attempt = attempt.next();
        }
    }

    fn should_retry(&self, err: &Error) -> bool {
        match err {
            Error::Run { .. } if self.settings.retry_terminal_run_states => true,
            other => other.is_retryable(),
        }
    }

    /// One attempt: append, create a run, poll it, fetch the reply
    async fn attempt_turn(
        &self,
        conversation_id: &str,
        text: &str,
        attempt: &mut TurnAttempt<'_>,
    ) -> Result<String> {
        self.provider
            .append_user_message(conversation_id, text)
            .await?;

        let run = self
            .provider
            .create_run(conversation_id, &self.agent_id)
            .await?;
        attempt.deadline = Some(Instant::now() + self.settings.run_deadline());
        debug!(run = %run.id, status = %run.status, "Run created");

        let mut status = run.status;
        let mut detail = run.detail;

        while !status.is_terminal() {
            attempt.ensure_live()?;
            sleep_or_cancel(self.settings.poll_interval(), attempt.cancel).await?;
            attempt.ensure_live()?;

            let snapshot = self.provider.retrieve_run(conversation_id, &run.id).await?;
            if !status.can_transition_to(snapshot.status) {
                return Err(Error::Protocol(format!(
                    "run {} moved from '{}' to '{}'",
                    run.id, status, snapshot.status
                )));
            }
            debug!(run = %run.id, status = %snapshot.status, "Polled run");
            status = snapshot.status;
            detail = snapshot.detail;

            if !status.is_terminal() && attempt.deadline_passed() {
                return Err(Error::Timeout(self.settings.run_deadline_secs));
            }
        }

        if status.is_failure() {
            let reason = match detail {
                Some(detail) => format!("{} ({})", status.failure_reason(), detail),
                None => status.failure_reason().to_string(),
            };
            return Err(Error::Run { state: status, reason });
        }

        let message = self
            .provider
            .latest_message(conversation_id)
            .await?
            .ok_or_else(|| Error::Protocol("completed run left no message".to_string()))?;

        if message.role != MessageRole::Assistant {
            return Err(Error::Protocol(format!(
                "latest message is from '{}', expected assistant",
                message.role
            )));
        }

        Ok(message.text)
    }
}

/// Sleep for `duration` unless `cancel` fires first
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::RunStatus;
    use crate::testing::{AttemptScript, Call, ScriptedConversation};
    use futures_util::StreamExt;

    async fn ready_client(provider: Arc<ScriptedConversation>) -> ConversationClient {
        ready_client_with(provider, ConversationConfig::default()).await
    }

    async fn ready_client_with(
        provider: Arc<ScriptedConversation>,
        settings: ConversationConfig,
    ) -> ConversationClient {
        let client = ConversationClient::new(provider, "asst_test", settings);
        client.initialize().await.unwrap();
        client.create_conversation().await.unwrap();
        client
    }

    async fn collect(
        client: &ConversationClient,
        text: &str,
        cancel: CancellationToken,
    ) -> (Vec<String>, Option<Error>) {
        let mut fragments = Vec::new();
        let stream = client.send_turn(text, cancel);
        futures_util::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => return (fragments, Some(e)),
            }
        }
        (fragments, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_turn_streams_reply() {
        let reply = "Admit rate is the share of applicants offered admission in a given cycle for each listed institution";
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::InProgress, RunStatus::Completed],
            reply,
        )]));
        let client = ready_client(provider.clone()).await;

        let (fragments, err) = collect(&client, "what is admit rate?", CancellationToken::new()).await;

        assert!(err.is_none());
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments.concat().trim_end(), reply);
        assert_eq!(provider.count(Call::RetrieveRun), 2);
        assert_eq!(provider.count(Call::LatestMessage), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragments_are_paced() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::Completed],
            "a b c d e f g h i j k l m n o p q r s t u",
        )]));
        let client = ready_client(provider).await;

        let stream = client.send_turn("hi", CancellationToken::new());
        futures_util::pin_mut!(stream);

        let mut stamps = Vec::new();
        while let Some(item) = stream.next().await {
            item.unwrap();
            stamps.push(Instant::now());
        }

        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_backs_off_2s_then_4s() {
        let provider = Arc::new(ScriptedConversation::new(vec![
            AttemptScript::FailAppend(503),
            AttemptScript::FailAppend(503),
            AttemptScript::completes(vec![RunStatus::Completed], "third time lucky"),
        ]));
        let client = ready_client(provider.clone()).await;

        let (fragments, err) = collect(&client, "hello", CancellationToken::new()).await;
        assert!(err.is_none());
        assert_eq!(fragments.concat(), "third time lucky ");

        let appends = provider.times(Call::AppendMessage);
        assert_eq!(appends.len(), 3);
        assert_eq!(appends[1] - appends[0], Duration::from_millis(2000));
        assert_eq!(appends[2] - appends[1], Duration::from_millis(4000));
        assert_eq!(provider.count(Call::CreateRun), 1);

        // A fresh call starts its backoff from the base again
        provider.push_scripts(vec![
            AttemptScript::FailAppend(503),
            AttemptScript::completes(vec![RunStatus::Completed], "again"),
        ]);
        let (_, err) = collect(&client, "hello again", CancellationToken::new()).await;
        assert!(err.is_none());
        let appends = provider.times(Call::AppendMessage);
        assert_eq!(appends.len(), 5);
        assert_eq!(appends[4] - appends[3], Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_failures_exhaust_retries() {
        let provider = Arc::new(ScriptedConversation::new(vec![
            AttemptScript::FailAppend(500),
            AttemptScript::FailAppend(500),
            AttemptScript::FailAppend(500),
            AttemptScript::FailAppend(500),
            AttemptScript::completes(vec![RunStatus::Completed], "never reached"),
        ]));
        let client = ready_client(provider.clone()).await;
        let started = Instant::now();

        let (fragments, err) = collect(&client, "hello", CancellationToken::new()).await;

        assert!(fragments.is_empty());
        match err {
            Some(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, Error::Provider { status: 500, .. }));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(provider.count(Call::AppendMessage), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(2000 + 4000 + 8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_polling_stops_network_calls() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::InProgress],
            "unused",
        )]));
        let client = ready_client(provider.clone()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (fragments, err) = collect(&client, "hello", cancel).await;

        assert!(fragments.is_empty());
        assert!(matches!(err, Some(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(2500) + client.settings().poll_interval());
        assert_eq!(provider.count(Call::LatestMessage), 0);
        assert_eq!(provider.count(Call::AppendMessage), 1);
        let polls_at_cancel = provider.count(Call::RetrieveRun);
        assert_eq!(polls_at_cancel, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_skips_retry() {
        let provider = Arc::new(ScriptedConversation::new(vec![
            AttemptScript::FailAppend(503),
            AttemptScript::completes(vec![RunStatus::Completed], "unused"),
        ]));
        let client = ready_client(provider.clone()).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let (_, err) = collect(&client, "hello", cancel).await;
        assert!(matches!(err, Some(Error::Cancelled)));
        assert_eq!(provider.count(Call::AppendMessage), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_times_out() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::InProgress],
            "unused",
        )]));
        let settings = ConversationConfig {
            max_retries: 0,
            ..ConversationConfig::default()
        };
        let client = ready_client_with(provider.clone(), settings).await;

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;

        match err {
            Some(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 1);
                assert!(matches!(*source, Error::Timeout(30)));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(provider.count(Call::RetrieveRun), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_action_is_not_retried() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::RequiresAction],
            "unused",
        )]));
        let client = ready_client(provider.clone()).await;

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;

        assert!(matches!(
            err,
            Some(Error::Run {
                state: RunStatus::RequiresAction,
                ..
            })
        ));
        assert_eq!(provider.count(Call::AppendMessage), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parity_mode_retries_requires_action() {
        let provider = Arc::new(ScriptedConversation::new(vec![
            AttemptScript::completes(vec![RunStatus::RequiresAction], "unused"),
            AttemptScript::completes(vec![RunStatus::Completed], "recovered"),
        ]));
        let settings = ConversationConfig {
            retry_terminal_run_states: true,
            ..ConversationConfig::default()
        };
        let client = ready_client_with(provider.clone(), settings).await;

        let (fragments, err) = collect(&client, "hello", CancellationToken::new()).await;
        assert!(err.is_none());
        assert_eq!(fragments.concat(), "recovered ");
        assert_eq!(provider.count(Call::CreateRun), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_reason_includes_detail() {
        let provider = Arc::new(
            ScriptedConversation::new(vec![AttemptScript::completes(
                vec![RunStatus::Failed],
                "unused",
            )])
            .with_run_detail("server_error: upstream"),
        );
        let settings = ConversationConfig {
            max_retries: 0,
            ..ConversationConfig::default()
        };
        let client = ready_client_with(provider, settings).await;

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;
        let Some(Error::RetryExhausted { source, .. }) = err else {
            panic!("expected exhausted retries");
        };
        let Error::Run { state, reason } = *source else {
            panic!("expected run error");
        };
        assert_eq!(state, RunStatus::Failed);
        assert!(reason.contains("server_error: upstream"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_assistant_reply_is_protocol_error() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::Run {
            statuses: vec![RunStatus::Completed],
            reply: Some((MessageRole::User, "echo".to_string())),
        }]));
        let settings = ConversationConfig {
            max_retries: 0,
            ..ConversationConfig::default()
        };
        let client = ready_client_with(provider, settings).await;

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;
        let Some(Error::RetryExhausted { source, .. }) = err else {
            panic!("expected exhausted retries");
        };
        assert!(matches!(*source, Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_regression_is_protocol_error() {
        let provider = Arc::new(ScriptedConversation::new(vec![AttemptScript::completes(
            vec![RunStatus::InProgress, RunStatus::Queued],
            "unused",
        )]));
        let settings = ConversationConfig {
            max_retries: 0,
            ..ConversationConfig::default()
        };
        let client = ready_client_with(provider, settings).await;

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;
        let Some(Error::RetryExhausted { source, .. }) = err else {
            panic!("expected exhausted retries");
        };
        assert!(matches!(*source, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_lifecycle_ordering() {
        let provider = Arc::new(ScriptedConversation::new(vec![]));
        let client = ConversationClient::new(provider.clone(), "asst_test", Default::default());

        assert!(matches!(
            client.create_conversation().await,
            Err(Error::Initialization(_))
        ));

        let agent = client.initialize().await.unwrap();
        assert_eq!(agent.display_name(), "Admissions Helper");

        let first = client.create_conversation().await.unwrap().to_string();
        let second = client.create_conversation().await.unwrap().to_string();
        assert_eq!(first, second);
        assert_eq!(provider.count(Call::CreateConversation), 1);
    }

    #[tokio::test]
    async fn test_initialize_requires_agent_id_and_reachable_provider() {
        let provider = Arc::new(ScriptedConversation::new(vec![]));
        let client = ConversationClient::new(provider, "  ", Default::default());
        assert!(matches!(client.initialize().await, Err(Error::Initialization(_))));

        let unreachable = Arc::new(ScriptedConversation::new(vec![]).unreachable());
        let client = ConversationClient::new(unreachable, "asst_test", Default::default());
        assert!(matches!(client.initialize().await, Err(Error::Initialization(_))));
        assert!(client.agent().is_none());
    }

    #[tokio::test]
    async fn test_send_before_conversation_fails() {
        let provider = Arc::new(ScriptedConversation::new(vec![]));
        let client = ConversationClient::new(provider, "asst_test", Default::default());
        client.initialize().await.unwrap();

        let (_, err) = collect(&client, "hello", CancellationToken::new()).await;
        assert!(matches!(err, Some(Error::InvalidTurnState(_))));
    }

    #[tokio::test]
    async fn test_conversation_create_failure_is_not_retried_by_send() {
        let provider = Arc::new(ScriptedConversation::new(vec![]).rejecting_conversations());
        let client = ConversationClient::new(provider.clone(), "asst_test", Default::default());
        client.initialize().await.unwrap();

        assert!(matches!(
            client.create_conversation().await,
            Err(Error::ConversationCreate(_))
        ));
        assert!(client.conversation_id().is_none());

        let (fragments, err) = collect(&client, "hello", CancellationToken::new()).await;
        assert!(fragments.is_empty());
        assert!(matches!(err, Some(Error::InvalidTurnState(_))));
        assert_eq!(provider.count(Call::CreateConversation), 1);
        assert_eq!(provider.count(Call::AppendMessage), 0);
    }
}
