//! In-memory provider fakes for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::conversation::RunStatus;
use crate::error::{Error, Result};
use crate::llm::{
    AgentInfo, ConversationMessage, ConversationProvider, EmbeddingProvider,
    MessageRole, RunSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    RetrieveAgent,
    CreateConversation,
    AppendMessage,
    CreateRun,
    RetrieveRun,
    LatestMessage,
}

/// Behaviour of one turn attempt, consumed when the user text is appended
#[derive(Debug, Clone)]
pub(crate) enum AttemptScript {
    /// Appending the message fails with this HTTP status
    FailAppend(u16),
    /// The run reports `statuses` in order, repeating the last one
    Run {
        statuses: Vec<RunStatus>,
        reply: Option<(MessageRole, String)>,
    },
}

impl AttemptScript {
    pub(crate) fn completes(statuses: Vec<RunStatus>, reply: &str) -> Self {
        Self::Run {
            statuses,
            reply: Some((MessageRole::Assistant, reply.to_string())),
        }
    }
}

#[derive(Default)]
struct State {
    scripts: VecDeque<AttemptScript>,
    statuses: VecDeque<RunStatus>,
    reply: Option<(MessageRole, String)>,
    runs: u32,
    calls: Vec<(Call, Instant)>,
}

/// Conversation provider driven by a queue of [`AttemptScript`]s
pub(crate) struct ScriptedConversation {
    state: Mutex<State>,
    run_detail: Option<String>,
    reachable: bool,
    accepts_conversations: bool,
}

impl ScriptedConversation {
    pub(crate) fn new(scripts: Vec<AttemptScript>) -> Self {
        Self {
            state: Mutex::new(State {
                scripts: scripts.into(),
                ..State::default()
            }),
            run_detail: None,
            reachable: true,
            accepts_conversations: true,
        }
    }

    pub(crate) fn with_run_detail(mut self, detail: &str) -> Self {
        self.run_detail = Some(detail.to_string());
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Conversation creation fails with a 500
    pub(crate) fn rejecting_conversations(mut self) -> Self {
        self.accepts_conversations = false;
        self
    }

    pub(crate) fn push_scripts(&self, scripts: Vec<AttemptScript>) {
        self.state.lock().unwrap().scripts.extend(scripts);
    }

    pub(crate) fn count(&self, call: Call) -> usize {
        self.times(call).len()
    }

    pub(crate) fn times(&self, call: Call) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, call: Call) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((call, Instant::now()));
        state
    }

    fn snapshot(&self, id: String, status: RunStatus) -> RunSnapshot {
        let detail = if status.is_failure() {
            self.run_detail.clone()
        } else {
            None
        };
        RunSnapshot { id, status, detail }
    }
}

#[async_trait]
impl ConversationProvider for ScriptedConversation {
    async fn retrieve_agent(&self, agent_id: &str) -> Result<AgentInfo> {
        drop(self.record(Call::RetrieveAgent));
        if !self.reachable {
            return Err(Error::Provider {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(AgentInfo {
            id: agent_id.to_string(),
            name: Some("Admissions Helper".to_string()),
        })
    }

    async fn create_conversation(&self) -> Result<String> {
        drop(self.record(Call::CreateConversation));
        if !self.accepts_conversations {
            return Err(Error::Provider {
                status: 500,
                message: "thread creation failed".to_string(),
            });
        }
        Ok("thread_test".to_string())
    }

    async fn append_user_message(&self, _conversation_id: &str, _text: &str) -> Result<()> {
        let mut state = self.record(Call::AppendMessage);
        match state.scripts.pop_front() {
            Some(AttemptScript::FailAppend(status)) => Err(Error::Provider {
                status,
                message: "scripted failure".to_string(),
            }),
            Some(AttemptScript::Run { statuses, reply }) => {
                state.statuses = statuses.into();
                state.reply = reply;
                Ok(())
            }
            None => Err(Error::Protocol("no scripted attempt left".to_string())),
        }
    }

    async fn create_run(&self, _conversation_id: &str, _agent_id: &str) -> Result<RunSnapshot> {
        let mut state = self.record(Call::CreateRun);
        state.runs += 1;
        let id = format!("run_{}", state.runs);
        drop(state);
        Ok(self.snapshot(id, RunStatus::Queued))
    }

    async fn retrieve_run(&self, _conversation_id: &str, run_id: &str) -> Result<RunSnapshot> {
        let mut state = self.record(Call::RetrieveRun);
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().copied()
        }
        .unwrap_or(RunStatus::InProgress);
        drop(state);
        Ok(self.snapshot(run_id.to_string(), status))
    }

    async fn latest_message(&self, _conversation_id: &str) -> Result<Option<ConversationMessage>> {
        let state = self.record(Call::LatestMessage);
        Ok(state.reply.clone().map(|(role, text)| ConversationMessage { role, text }))
    }
}

/// Embedder returning one fixed vector, optionally slow or failing
pub(crate) struct FixedEmbedder {
    vector: Vec<f32>,
    delay: Duration,
    fail: bool,
}

impl FixedEmbedder {
    pub(crate) fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::Embedding("scripted embedding failure".to_string()));
        }
        Ok(self.vector.clone())
    }
}
