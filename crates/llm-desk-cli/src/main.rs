use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use llm_desk_agent::{AgentSettings, TaskAgent};
use llm_desk_core::config::Config;
use llm_desk_core::conversation::{ConversationSink, NewMessage};
use llm_desk_core::conversation_store::JsonlConversationStore;
use llm_desk_core::markdown::conversation_to_markdown;
use llm_desk_core::task::{TaskStatus, TaskStore};
use llm_desk_core::task_store::JsonTaskStore;
use llm_desk_core::types::{ChatMessage, ChatRole};
use llm_desk_providers::probe::ProbeReport;
use llm_desk_providers::{ChatProvider, ProviderRouter, Vendor};

mod logging;

#[derive(Parser)]
#[command(
    name = "llm-desk",
    about = "Chat with several LLM vendors and run a background task agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and stream the reply
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Conversation to continue (default: most recent)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Task queue management
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Run the background agent until Ctrl-C
    Agent {
        /// Conversation receiving task results
        #[arg(long)]
        conversation: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,
    },

    /// Conversation management
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Provider checks
    Providers {
        #[command(subcommand)]
        action: ProviderAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Queue a task
    Add { content: String },
    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Remove a task
    Remove { id: u64 },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// List conversations
    List,
    /// Create a conversation
    New { title: Option<String> },
    /// Print a conversation's messages
    Show { id: String },
    /// Export a conversation as Markdown
    Export {
        id: String,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Copy a conversation up to a message into a new one
    Branch {
        id: String,
        /// Last message id to keep
        #[arg(long)]
        at: Option<u64>,
    },
    /// Delete a conversation
    Delete { id: String },
}

#[derive(Subcommand)]
enum ProviderAction {
    /// Send a test request to the default provider
    Test,
    /// List models offered by the default provider
    Models,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(config.logging.as_ref(), cli.verbose);

    let data_dir = config.storage_dir();
    tracing::debug!(config = %config_path.display(), data = %data_dir.display(), "Starting llm-desk");

    match cli.command {
        Commands::Chat {
            message,
            conversation,
        } => chat(&config, &data_dir, message, conversation).await?,
        Commands::Task { action } => task(&data_dir, action).await?,
        Commands::Agent {
            conversation,
            model,
        } => agent(config, &data_dir, conversation, model).await?,
        Commands::Conversations { action } => conversations(&data_dir, action).await?,
        Commands::Providers { action } => providers(&config, action).await?,
        Commands::Config { action } => config_command(config, &config_path, action)?,
    }

    Ok(())
}

async fn chat(
    config: &Config,
    data_dir: &Path,
    message: String,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let chat_config = config.chat_config()?;
    let store = JsonlConversationStore::new(data_dir.to_path_buf());
    let conversation_id = match conversation {
        Some(id) => id,
        None => store.latest_or_create().await?.id,
    };

    store
        .append(NewMessage::new(conversation_id.as_str(), ChatRole::User, message))
        .await?;
    let history: Vec<ChatMessage> = store
        .messages(&conversation_id)
        .await?
        .iter()
        .map(|m| m.to_chat())
        .collect();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let router = ProviderRouter::new();
    let mut stream = router.stream_chat(&chat_config, &history, cancel.clone()).await?;

    let mut reply = String::new();
    let mut stdout = std::io::stdout();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        print!("{delta}");
        stdout.flush()?;
        reply.push_str(&delta);
    }
    println!();

    if cancel.is_cancelled() {
        tracing::info!("Reply interrupted");
    }
    if !reply.is_empty() {
        let mut assistant = NewMessage::new(conversation_id.as_str(), ChatRole::Assistant, reply);
        assistant.model = Some(chat_config.model.clone());
        store.append(assistant).await?;
    }
    Ok(())
}

async fn task(data_dir: &Path, action: TaskAction) -> anyhow::Result<()> {
    let store = JsonTaskStore::new(data_dir.to_path_buf());
    match action {
        TaskAction::Add { content } => {
            let id = store.enqueue(&content).await?;
            println!("Queued task {id}");
        }
        TaskAction::List { status } => {
            let tasks = store.list(status).await?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for t in tasks {
                println!(
                    "{:>4}  {:<10}  {}  {}",
                    t.id,
                    t.status.as_str(),
                    t.created_at.format("%Y-%m-%d %H:%M:%S"),
                    t.content
                );
                if let Some(result) = t.result {
                    println!("      -> {result}");
                }
            }
        }
        TaskAction::Remove { id } => {
            store.remove(id).await?;
            println!("Removed task {id}");
        }
    }
    Ok(())
}

async fn agent(
    config: Config,
    data_dir: &Path,
    conversation: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    let api_key = config.active_api_key().with_context(|| {
        format!(
            "no API key configured for provider '{}'",
            config.default_provider
        )
    })?;
    let model = model.unwrap_or_else(|| config.model.clone());

    let tasks = Arc::new(JsonTaskStore::new(data_dir.to_path_buf()));
    let conversations = Arc::new(JsonlConversationStore::new(data_dir.to_path_buf()));

    let recovered = tasks.recover_interrupted().await?;
    if recovered > 0 {
        println!("Re-queued {recovered} interrupted task(s)");
    }

    let conversation_id = match conversation.or_else(|| config.agent().conversation_id) {
        Some(id) => id,
        None => conversations.latest_or_create().await?.id,
    };

    let settings = AgentSettings::from_config(&config);
    let agent = TaskAgent::new(
        tasks,
        conversations,
        Arc::new(ProviderRouter::new()),
        Arc::new(RwLock::new(config)),
        settings,
    );

    agent.start(&api_key, &model, &conversation_id)?;
    println!("Agent running (model {model}, conversation {conversation_id}). Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    agent.stop().await;
    println!("Agent stopped");
    Ok(())
}

async fn conversations(data_dir: &Path, action: ConversationAction) -> anyhow::Result<()> {
    let store = JsonlConversationStore::new(data_dir.to_path_buf());
    match action {
        ConversationAction::List => {
            let list = store.list().await?;
            if list.is_empty() {
                println!("No conversations.");
            }
            for c in list {
                println!(
                    "{}  {}  {}",
                    c.id,
                    c.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    c.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        ConversationAction::New { title } => {
            let id = store.create(title.as_deref()).await?;
            println!("{id}");
        }
        ConversationAction::Show { id } => {
            let conversation = store
                .get(&id)
                .await?
                .with_context(|| format!("conversation {id} not found"))?;
            println!("# {}", conversation.title.as_deref().unwrap_or("(untitled)"));
            for m in store.messages(&id).await? {
                println!("\n[{}] {}:\n{}", m.id, m.role, m.content);
            }
        }
        ConversationAction::Export { id, out } => {
            let markdown = conversation_to_markdown(&store.messages(&id).await?);
            match out {
                Some(path) => {
                    std::fs::write(&path, markdown)?;
                    println!("Exported to {}", path.display());
                }
                None => print!("{markdown}"),
            }
        }
        ConversationAction::Branch { id, at } => {
            let branch = store.branch(&id, at).await?;
            println!("{branch}");
        }
        ConversationAction::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted conversation {id}");
        }
    }
    Ok(())
}

async fn providers(config: &Config, action: ProviderAction) -> anyhow::Result<()> {
    let router = ProviderRouter::new();
    let vendor: Vendor = config.default_provider.parse()?;
    match action {
        ProviderAction::Test => {
            let report = match config.active_api_key() {
                Some(_) => router.probe(&config.chat_config()?).await,
                None => ProbeReport::no_key(),
            };
            match (report.ok, report.latency_ms, report.error) {
                (true, Some(ms), _) => println!("{}: ok ({ms} ms)", vendor.display_name()),
                (true, None, _) => println!("{}: ok", vendor.display_name()),
                (false, _, err) => println!(
                    "{}: failed: {}",
                    vendor.display_name(),
                    err.unwrap_or_else(|| "unknown error".into())
                ),
            }
        }
        ProviderAction::Models => {
            for model in router.list_models(vendor, &config.chat_config()?).await? {
                println!("{model}");
            }
        }
    }
    Ok(())
}

fn config_command(mut config: Config, path: &Path, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigAction::Get { key } => match config.get_path(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("no config value at '{key}'"),
        },
        ConfigAction::Set { key, value } => {
            // Accept JSON literals, fall back to a plain string.
            let parsed = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            config.set_path(&key, parsed)?;
            config.save(path)?;
            println!("Set {key} in {}", path.display());
        }
        ConfigAction::Validate => {
            let (warnings, errors) = config.validate();
            for w in &warnings {
                println!("warning: {w}");
            }
            for e in &errors {
                println!("error: {e}");
            }
            if !errors.is_empty() {
                anyhow::bail!("configuration has {} error(s)", errors.len());
            }
            if warnings.is_empty() {
                println!("Configuration OK");
            }
        }
    }
    Ok(())
}
