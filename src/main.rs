//! toolrelay CLI entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use toolrelay::adapters::{cli::print_reply, load_image, CliChannel};
use toolrelay::agent::Engine;
use toolrelay::auth::AuthenticatorManager;
use toolrelay::collab::{LogNotifier, StaticKnowledge, TracingAuditSink};
use toolrelay::config::{self, Config};
use toolrelay::invoker::HttpInvoker;
use toolrelay::registry::FunctionRegistry;
use toolrelay::store::FileStore;
use toolrelay::ui;

#[derive(Parser)]
#[command(name = "toolrelay")]
#[command(about = "Let a model call your HTTP functions, then hand off to a human when it should")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.toolrelay/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug logs)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and an empty store
    Init,

    /// Chat with the agent
    Chat {
        /// Message to send (interactive mode when omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation ID
        #[arg(short, long, default_value = "cli:default")]
        conversation: String,

        /// Image to attach (file path or URL); repeatable
        #[arg(long = "image")]
        images: Vec<String>,

        /// Keep history in memory only, as an operator testing the agent
        #[arg(long)]
        test_as: Option<String>,

        /// Text file appended to the system prompt as knowledge
        #[arg(long)]
        knowledge: Option<PathBuf>,
    },

    /// List the tool catalog the agent exposes
    Functions,

    /// Call one function directly
    Invoke {
        /// Function name (with or without the fn_ prefix)
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Show toolrelay status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("toolrelay=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);

    match cli.command {
        Commands::Init => {
            let config = config::init(&config_path)?;
            ui::print_success(&format!("Config written to {:?}", config_path));
            ui::print_success(&format!("Store at {:?}", config.store_path));
            println!("\nNext steps:");
            println!("  1. Set provider.api_key in {:?}", config_path);
            println!("  2. Add functions and authenticators to the store file");
            println!("  3. Chat: toolrelay chat -m \"Hello!\"");
        }

        Commands::Chat {
            message,
            conversation,
            images,
            test_as,
            knowledge,
        } => {
            let config = config::load_from(&config_path)?;
            let mut engine = build_engine(&config)?;
            if let Some(path) = knowledge {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read knowledge file {:?}", path))?;
                engine = engine.with_knowledge(Arc::new(StaticKnowledge(text)));
            }

            let mut channel = CliChannel::new(Arc::new(engine), &conversation);
            if let Some(identity) = &test_as {
                channel = channel.test_mode(identity);
            }

            match message {
                Some(text) => {
                    let images = images
                        .iter()
                        .map(|arg| load_image(arg))
                        .collect::<toolrelay::Result<Vec<_>>>()?;
                    let reply = channel.run_once(&text, images).await?;
                    print_reply(&config.agent.name, reply.as_ref());
                }
                None => {
                    ui::print_header(
                        &config.agent.name,
                        config.provider.name(),
                        config.provider.model(),
                    );
                    println!("  Interactive mode (type 'exit' to quit)");
                    channel.run_interactive().await?;
                }
            }
        }

        Commands::Functions => {
            let config = config::load_from(&config_path)?;
            let engine = build_engine(&config)?;
            let tools = engine.dispatcher().catalog(&config.agent.id).await?;
            for tool in tools {
                ui::print_step(&format!("{} - {}", tool.name, tool.description));
            }
        }

        Commands::Invoke { name, args } => {
            let config = config::load_from(&config_path)?;
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;

            let store = Arc::new(FileStore::open(&config.store_path)?);
            let http = config.http_client()?;
            let auth = Arc::new(AuthenticatorManager::new(store.clone(), http.clone()));
            let invoker = HttpInvoker::new(http, auth);
            let def = FunctionRegistry::new(store).resolve(&name, &config.agent.id).await?;

            match invoker.invoke(&def, &args).await {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&e.to_tool_payload())?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Status => {
            let config = config::load_from(&config_path)?;
            let store = FileStore::open(&config.store_path)?;
            let doc = store.snapshot();

            ui::print_header(&config.agent.name, config.provider.name(), config.provider.model());
            ui::print_field("Agent", &format!("{} ({})", config.agent.name, config.agent.id));
            ui::print_field("Organization", &config.agent.organization_id);
            ui::print_field(
                "Provider",
                match config.provider.validate() {
                    Ok(()) => "ready",
                    Err(_) => "incomplete (check api_key)",
                },
            );
            ui::print_field("Store", &format!("{:?}", config.store_path));
            ui::print_field(
                "Functions",
                &doc.functions.get(&config.agent.id).map_or(0, Vec::len).to_string(),
            );
            ui::print_field("Authenticators", &doc.authenticators.len().to_string());
            ui::print_field("Conversations", &doc.conversations.len().to_string());
            ui::print_field("Max iterations", &config.max_iterations.to_string());
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<Engine> {
    let store = Arc::new(FileStore::open(&config.store_path)?);
    let http = config.http_client()?;
    let engine = Engine::from_config(
        config,
        store,
        http,
        Arc::new(LogNotifier),
        Arc::new(TracingAuditSink),
    )?;
    Ok(engine)
}
