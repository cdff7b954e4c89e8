//! OpenAI-compatible HTTP client
//!
//! Provides async HTTP access to:
//! - Hosted assistants (threads, messages, runs) for conversational turns
//! - Embeddings for retrieval queries
//! - Chat completions for synthesis and one-shot questions

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::conversation::RunStatus;
use crate::error::{Error, Result};

use super::provider::{
    AgentInfo, CompletionProvider, ConversationMessage, ConversationProvider, EmbeddingProvider,
    RunSnapshot,
};
use super::types::{
    AssistantObject, ChatRequest, ChatResponse, CreateMessageRequest, CreateRunRequest,
    EmbeddingRequest, EmbeddingResponse, Message, MessageList, MessageRole, RunObject,
    ThreadObject,
};

/// Header selecting the assistants API revision
const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

/// OpenAI-compatible client
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("chat_model", &self.config.chat_model)
            .field("embedding_model", &self.config.embedding_model)
            .finish()
    }
}

/// Builder for creating an OpenAiClient
#[derive(Default)]
pub struct OpenAiClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl OpenAiClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the LLM configuration
    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL (defaults to `config.api_base`)
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Build the OpenAiClient
    pub fn build(self) -> Result<OpenAiClient> {
        let config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Initialization("API key is required".to_string()))?;

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::Network)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| config.api_base.clone())
            .trim_end_matches('/')
            .to_string();

        Ok(OpenAiClient {
            http_client,
            config,
            api_key,
            base_url,
        })
    }
}

impl OpenAiClient {
    /// Create a new client with the given configuration and API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        OpenAiClientBuilder::new()
            .config(config)
            .api_key(api_key)
            .build()
    }

    pub fn builder() -> OpenAiClientBuilder {
        OpenAiClientBuilder::new()
    }

    pub fn chat_model(&self) -> &str {
        &self.config.chat_model
    }

    pub fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn assistants_get(&self, path: &str) -> RequestBuilder {
        self.http_client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    fn assistants_post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RequestBuilder {
        self.http_client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
            .json(body)
    }

    /// Send a request and decode a JSON body, mapping non-2xx statuses
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(Error::Network)?;
        let status = response.status();

        if !status.is_success() {
            return handle_error_response(status, response).await;
        }

        response.json::<T>().await.map_err(|e| {
            Error::Protocol(format!("Failed to parse provider response: {}", e))
        })
    }

    /// Make a chat completion request
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatRequest::new(&self.config.chat_model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response: ChatResponse = self
            .send_json(
                self.http_client
                    .post(self.url("/chat/completions"))
                    .bearer_auth(&self.api_key)
                    .json(&request),
            )
            .await?;

        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Chat completion usage"
            );
        }

        response
            .into_content()
            .ok_or_else(|| Error::Completion("Empty response from API".to_string()))
    }

    /// Generate an embedding for a single text
    pub async fn embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(&self.config.embedding_model, text);

        debug!(model = %request.model, "Sending embedding request");

        let response: EmbeddingResponse = self
            .send_json(
                self.http_client
                    .post(self.url("/embeddings"))
                    .bearer_auth(&self.api_key)
                    .json(&request),
            )
            .await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("Empty embedding response".to_string()))
    }
}

#[async_trait]
impl ConversationProvider for OpenAiClient {
    async fn retrieve_agent(&self, agent_id: &str) -> Result<AgentInfo> {
        let assistant: AssistantObject = self
            .send_json(self.assistants_get(&format!("/assistants/{}", agent_id)))
            .await?;

        debug!(assistant = %assistant.id, model = ?assistant.model, "Retrieved assistant");

        Ok(AgentInfo {
            id: assistant.id,
            name: assistant.name,
        })
    }

    async fn create_conversation(&self) -> Result<String> {
        let thread: ThreadObject = self
            .send_json(self.assistants_post("/threads", &serde_json::json!({})))
            .await?;
        Ok(thread.id)
    }

    async fn append_user_message(&self, conversation_id: &str, text: &str) -> Result<()> {
        let body = CreateMessageRequest {
            role: MessageRole::User,
            content: text,
        };
        let _: serde_json::Value = self
            .send_json(
                self.assistants_post(&format!("/threads/{}/messages", conversation_id), &body),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, conversation_id: &str, agent_id: &str) -> Result<RunSnapshot> {
        let body = CreateRunRequest {
            assistant_id: agent_id,
        };
        let run: RunObject = self
            .send_json(self.assistants_post(&format!("/threads/{}/runs", conversation_id), &body))
            .await?;
        run_snapshot(run)
    }

    async fn retrieve_run(&self, conversation_id: &str, run_id: &str) -> Result<RunSnapshot> {
        let run: RunObject = self
            .send_json(
                self.assistants_get(&format!("/threads/{}/runs/{}", conversation_id, run_id)),
            )
            .await?;
        run_snapshot(run)
    }

    async fn latest_message(&self, conversation_id: &str) -> Result<Option<ConversationMessage>> {
        let list: MessageList = self
            .send_json(
                self.assistants_get(&format!("/threads/{}/messages", conversation_id))
                    .query(&[("limit", "1"), ("order", "desc")]),
            )
            .await?;

        Ok(list.data.into_iter().next().map(|m| ConversationMessage {
            role: m.role,
            text: m.text(),
        }))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedding(text).await.map_err(|e| match e {
            Error::Embedding(_) => e,
            other => Error::Embedding(other.to_string()),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![Message::system(system), Message::user(user)])
            .await
            .map_err(|e| match e {
                Error::Completion(_) => e,
                other => Error::Completion(other.to_string()),
            })
    }
}

fn run_snapshot(run: RunObject) -> Result<RunSnapshot> {
    let status = RunStatus::parse(&run.status)
        .ok_or_else(|| Error::Protocol(format!("Unknown run status '{}'", run.status)))?;
    let detail = run.failure_detail();
    Ok(RunSnapshot {
        id: run.id,
        status,
        detail,
    })
}

/// Map a non-2xx response onto the error taxonomy
async fn handle_error_response<T>(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> Result<T> {
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 => Err(Error::Initialization(
            "Unauthorized: invalid API key. Set ADMITGRAPH_API_KEY or OPENAI_API_KEY.".to_string(),
        )),
        429 => {
            let wait_secs = extract_retry_after(&body).unwrap_or(60);
            warn!(wait_secs, "Provider rate limited the request");
            Err(Error::RateLimited(wait_secs))
        }
        code => Err(Error::Provider {
            status: code,
            message: extract_error_message(&body).unwrap_or(body),
        }),
    }
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

/// Extract `error.message` from an OpenAI-style error body
fn extract_error_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
