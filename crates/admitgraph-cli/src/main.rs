//! Admitgraph CLI - admissions data assistant with knowledge-graph retrieval

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use admitgraph_core::config::Config;
use admitgraph_core::conversation::ConversationClient;
use admitgraph_core::knowledge::{KnowledgeArtifacts, RetrievalEngine, SimilarityIndex};
use admitgraph_core::llm::{CompletionProvider, OpenAiClient};
use admitgraph_core::orchestrator::{ChatSession, TurnEvent, TurnOrchestrator};
use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use futures_core::Stream;
use futures_util::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};


const ASK_SYSTEM_PROMPT: &str = "You are a concise assistant for questions about \
college admissions data: institutions, applicants, and the fields that describe them.";

#[derive(Parser)]
#[command(name = "admitgraph")]
#[command(author, version, about = "Admissions data assistant with knowledge-graph retrieval", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the hosted admissions assistant
    Chat,

    /// Ask a single question without a conversation
    Ask {
        /// Question text
        text: String,
    },

    /// Look up dataset fields related to a query
    Search {
        /// Query text
        text: String,
        /// Number of fields to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Summarise the matching fields
        #[arg(long, overrides_with = "no_synthesize")]
        synthesize: bool,
        /// Skip the summary even if enabled in configuration
        #[arg(long)]
        no_synthesize: bool,
        /// Embeddings file (overrides retrieval.embeddings_path)
        #[arg(long)]
        embeddings: Option<PathBuf>,
        /// Node names file (overrides retrieval.node_names_path)
        #[arg(long)]
        names: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let directive = if cli.verbose {
        "admitgraph=debug"
    } else if cli.quiet {
        "admitgraph=warn"
    } else {
        "admitgraph=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Chat => cmd_chat(cli.quiet).await,

        Commands::Ask { text } => cmd_ask(&text, cli.format).await,

        Commands::Search {
            text,
            top_k,
            synthesize,
            no_synthesize,
            embeddings,
            names,
        } => {
            let synthesize = match (synthesize, no_synthesize) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let artifacts = ArtifactPaths { embeddings, names };
            cmd_search(&text, top_k, synthesize, artifacts, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
    };

    if let Err(err) = &result {
        if let Some(core) = err.downcast_ref::<admitgraph_core::Error>() {
            eprintln!("Error [{}]: {:#}", core.code(), err);
            if let Some(hint) = core.suggestion() {
                eprintln!("hint: {}", hint);
            }
            std::process::exit(1);
        }
    }
    result
}

// ============================================================================
// Shared setup
// ============================================================================

struct ArtifactPaths {
    embeddings: Option<PathBuf>,
    names: Option<PathBuf>,
}

impl ArtifactPaths {
    fn from_config(config: &Config) -> Self {
        Self {
            embeddings: None,
            names: None,
        }
        .or_config(config)
    }

    fn or_config(self, config: &Config) -> Self {
        Self {
            embeddings: self
                .embeddings
                .or_else(|| config.retrieval.embeddings_path.clone()),
            names: self.names.or_else(|| config.retrieval.node_names_path.clone()),
        }
    }

    fn load(&self) -> anyhow::Result<Arc<SimilarityIndex>> {
        let embeddings = self.embeddings.as_ref().ok_or_else(|| {
            anyhow!(
                "No embeddings file configured. Pass --embeddings or run \
                 `admitgraph config set retrieval.embeddings_path <file>`"
            )
        })?;
        let names = self.names.as_ref().ok_or_else(|| {
            anyhow!(
                "No node names file configured. Pass --names or run \
                 `admitgraph config set retrieval.node_names_path <file>`"
            )
        })?;

        let index = Arc::new(SimilarityIndex::new());
        KnowledgeArtifacts::from_paths(embeddings, names)
            .and_then(|artifacts| artifacts.load_into(&index))
            .with_context(|| format!("Failed to load knowledge from {}", embeddings.display()))?;
        debug!(nodes = index.len(), "Knowledge index loaded");
        Ok(index)
    }
}

fn llm_client(config: &Config) -> anyhow::Result<Arc<OpenAiClient>> {
    let api_key = config.llm.resolved_api_key()?.ok_or_else(|| {
        anyhow!("No API key found. Set the ADMITGRAPH_API_KEY or OPENAI_API_KEY environment variable.")
    })?;
    Ok(Arc::new(OpenAiClient::new(config.llm.clone(), api_key)?))
}

/// Cancel `cancel` on the next Ctrl-C; abort the handle once the turn ends
fn cancel_on_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Ctrl-C received, cancelling turn");
            cancel.cancel();
        }
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_chat(quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let assistant_id = config.llm.resolved_assistant_id().ok_or_else(|| {
        anyhow!(
            "No assistant configured. Set ADMITGRAPH_ASSISTANT_ID or run \
             `admitgraph config set llm.assistant_id <id>`"
        )
    })?;
    let client = llm_client(&config)?;

    let conversation =
        ConversationClient::new(client.clone(), assistant_id, config.conversation.clone());
    let mut orchestrator = TurnOrchestrator::new(conversation);
    match ArtifactPaths::from_config(&config).load() {
        Ok(index) => {
            let engine = RetrievalEngine::new(client, index).with_top_k(config.retrieval.top_k);
            orchestrator = orchestrator.with_retrieval(engine);
        }
        Err(e) => warn!(error = %e, "Knowledge unavailable, replies will not be annotated"),
    }

    let mut session = ChatSession::start(orchestrator).await?;
    let agent = session.agent_name().to_string();

    if !quiet {
        println!("Chatting with {}.", agent);
        println!("Ctrl-C cancels a reply, /regenerate retries a failed one, /quit exits.\n");
    }

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match tokio::task::block_in_place(|| editor.readline("you> ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        if matches!(input, "/quit" | "/exit") {
            break;
        }

        let cancel = CancellationToken::new();
        let watcher = cancel_on_ctrl_c(cancel.clone());

        let outcome = if input == "/regenerate" {
            match session.regenerate(cancel) {
                Ok(events) => render_turn(events, &agent, quiet).await,
                Err(e) => {
                    println!("{}", e);
                    Ok(())
                }
            }
        } else {
            render_turn(session.send(input, cancel), &agent, quiet).await
        };

        watcher.abort();
        outcome?;
    }

    if !quiet {
        println!("Goodbye.");
    }
    Ok(())
}

async fn render_turn(
    events: impl Stream<Item = TurnEvent>,
    agent: &str,
    quiet: bool,
) -> anyhow::Result<()> {
    futures_util::pin_mut!(events);
    let mut stdout = std::io::stdout();

    print!("{}> ", agent);
    stdout.flush()?;

    while let Some(event) = events.next().await {
        match event {
            TurnEvent::Fragment(fragment) => {
                print!("{}", fragment);
                stdout.flush()?;
            }
            TurnEvent::Delivered(turn) => {
                println!();
                if let Some(knowledge) = turn.knowledge.filter(|k| !k.is_empty()) {
                    if !quiet {
                        println!("\nRelated fields:");
                        print!("{}", knowledge);
                    }
                }
                println!();
            }
            TurnEvent::Failed { turn, error } => {
                println!();
                println!("{}", turn.error.as_deref().unwrap_or_default());
                if !error.is_cancelled() {
                    debug!(code = error.code(), error = %error, "Turn failure detail");
                }
                println!();
            }
        }
    }
    Ok(())
}

async fn cmd_ask(text: &str, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let client = llm_client(&config)?;

    let answer = client.complete(ASK_SYSTEM_PROMPT, text).await?;

    match format {
        OutputFormat::Text => println!("{}", answer.trim()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "question": text,
                "answer": answer.trim(),
                "model": client.chat_model(),
            }))?
        ),
    }
    Ok(())
}

async fn cmd_search(
    text: &str,
    top_k: Option<usize>,
    synthesize: Option<bool>,
    artifacts: ArtifactPaths,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let index = artifacts.or_config(&config).load()?;
    let client = llm_client(&config)?;

    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    if top_k == 0 {
        return Err(anyhow!("--top-k must be positive"));
    }

    let mut engine = RetrievalEngine::new(client.clone(), index).with_top_k(top_k);
    if synthesize.unwrap_or(config.retrieval.synthesize) {
        engine = engine.with_completer(client);
    }

    let answer = engine.query_with_synthesis(text).await?;

    match format {
        OutputFormat::Text => {
            if answer.result.is_empty() {
                println!("No related fields found.");
            } else {
                print!("{}", answer.result);
            }
            if let Some(summary) = &answer.synthesis {
                println!("\n{}", summary.trim());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match format {
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = items
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
