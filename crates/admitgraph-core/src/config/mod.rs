//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Admitgraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub conversation: ConversationConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    /// Hosted assistant that owns conversation runs
    pub assistant_id: Option<String>,
}

/// Timing and retry knobs for one conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub poll_interval_ms: u64,
    pub run_deadline_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub chunk_words: usize,
    pub pacing_ms: u64,
    /// Retry `requires_action` and remote cancellations like transient failures
    pub retry_terminal_run_states: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub synthesize: bool,
    pub embeddings_path: Option<PathBuf>,
    pub node_names_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            timeout_secs: 60,
            assistant_id: None,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            run_deadline_secs: 30,
            max_retries: 3,
            backoff_base_ms: 2000,
            chunk_words: 10,
            pacing_ms: 50,
            retry_terminal_run_states: false,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            synthesize: true,
            embeddings_path: None,
            node_names_path: None,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("ADMITGRAPH_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.map(|key| redact_key(&key)))
    }

    /// Assistant id from the environment, falling back to the config file
    pub fn resolved_assistant_id(&self) -> Option<String> {
        env::var("ADMITGRAPH_ASSISTANT_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.assistant_id.clone())
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

/// Mask all but the last four characters of an API key
fn redact_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        return "***".to_string();
    }
    let suffix: String = key.chars().skip(len - 4).collect();
    format!("***{}", suffix)
}

impl ConversationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Backoff before retry number `retry` (0-based): base * 2^retry
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << retry.min(16)))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ADMITGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("admitgraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.conversation.poll_interval_ms == 0 {
            return Err(anyhow!("conversation.poll_interval_ms must be positive"));
        }
        if self.conversation.chunk_words == 0 {
            return Err(anyhow!("conversation.chunk_words must be positive"));
        }
        if self.retrieval.top_k == 0 {
            return Err(anyhow!("retrieval.top_k must be positive"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let path_or_unset = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };

        match key {
            // LLM settings
            "llm.api_base" => Ok(self.llm.api_base.clone()),
            "llm.chat_model" => Ok(self.llm.chat_model.clone()),
            "llm.embedding_model" => Ok(self.llm.embedding_model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),
            "llm.assistant_id" => Ok(self
                .llm
                .resolved_assistant_id()
                .unwrap_or_else(|| "(not set - use ADMITGRAPH_ASSISTANT_ID env var)".to_string())),

            // Conversation settings
            "conversation.poll_interval_ms" => Ok(self.conversation.poll_interval_ms.to_string()),
            "conversation.run_deadline_secs" => {
                Ok(self.conversation.run_deadline_secs.to_string())
            }
            "conversation.max_retries" => Ok(self.conversation.max_retries.to_string()),
            "conversation.backoff_base_ms" => Ok(self.conversation.backoff_base_ms.to_string()),
            "conversation.chunk_words" => Ok(self.conversation.chunk_words.to_string()),
            "conversation.pacing_ms" => Ok(self.conversation.pacing_ms.to_string()),
            "conversation.retry_terminal_run_states" => {
                Ok(self.conversation.retry_terminal_run_states.to_string())
            }

            // Retrieval settings
            "retrieval.top_k" => Ok(self.retrieval.top_k.to_string()),
            "retrieval.synthesize" => Ok(self.retrieval.synthesize.to_string()),
            "retrieval.embeddings_path" => Ok(path_or_unset(&self.retrieval.embeddings_path)),
            "retrieval.node_names_path" => Ok(path_or_unset(&self.retrieval.node_names_path)),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok(
                    "(not set - use ADMITGRAPH_API_KEY or OPENAI_API_KEY env var)".to_string(),
                ),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `admitgraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        fn positive<T: std::str::FromStr + PartialOrd + Default>(
            key: &str,
            value: &str,
        ) -> anyhow::Result<T> {
            let parsed: T = value
                .parse()
                .map_err(|_| anyhow!("Invalid {} value: {}", key, value))?;
            if parsed <= T::default() {
                return Err(anyhow!("{} must be positive", key));
            }
            Ok(parsed)
        }

        fn flag(key: &str, value: &str) -> anyhow::Result<bool> {
            value
                .parse()
                .with_context(|| format!("Invalid {} value: {} (expected true/false)", key, value))
        }

        match key {
            // LLM settings
            "llm.api_base" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("llm.api_base must be an http(s) URL"));
                }
                self.llm.api_base = value.trim_end_matches('/').to_string();
            }
            "llm.chat_model" => self.llm.chat_model = value.to_string(),
            "llm.embedding_model" => self.llm.embedding_model = value.to_string(),
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => self.llm.max_tokens = positive(key, value)?,
            "llm.timeout_secs" => self.llm.timeout_secs = positive(key, value)?,
            "llm.assistant_id" => {
                let id = value.trim();
                self.llm.assistant_id = (!id.is_empty()).then(|| id.to_string());
            }

            // Conversation settings
            "conversation.poll_interval_ms" => {
                self.conversation.poll_interval_ms = positive(key, value)?
            }
            "conversation.run_deadline_secs" => {
                self.conversation.run_deadline_secs = positive(key, value)?
            }
            "conversation.max_retries" => {
                self.conversation.max_retries = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries value: {}", value))?;
            }
            "conversation.backoff_base_ms" => {
                self.conversation.backoff_base_ms = value
                    .parse()
                    .with_context(|| format!("Invalid backoff_base_ms value: {}", value))?;
            }
            "conversation.chunk_words" => self.conversation.chunk_words = positive(key, value)?,
            "conversation.pacing_ms" => {
                self.conversation.pacing_ms = value
                    .parse()
                    .with_context(|| format!("Invalid pacing_ms value: {}", value))?;
            }
            "conversation.retry_terminal_run_states" => {
                self.conversation.retry_terminal_run_states = flag(key, value)?
            }

            // Retrieval settings
            "retrieval.top_k" => self.retrieval.top_k = positive(key, value)?,
            "retrieval.synthesize" => self.retrieval.synthesize = flag(key, value)?,
            "retrieval.embeddings_path" => {
                self.retrieval.embeddings_path = Some(PathBuf::from(value))
            }
            "retrieval.node_names_path" => {
                self.retrieval.node_names_path = Some(PathBuf::from(value))
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the ADMITGRAPH_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `admitgraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "llm.api_base",
            "llm.chat_model",
            "llm.embedding_model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.assistant_id",
            "llm.api_key",
            "conversation.poll_interval_ms",
            "conversation.run_deadline_secs",
            "conversation.max_retries",
            "conversation.backoff_base_ms",
            "conversation.chunk_words",
            "conversation.pacing_ms",
            "conversation.retry_terminal_run_states",
            "retrieval.top_k",
            "retrieval.synthesize",
            "retrieval.embeddings_path",
            "retrieval.node_names_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
