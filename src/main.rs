use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use pagewright::{
    Config, Fetched, Generator, HttpModel, MemoryStore, ModelBackend, ModelKind, Page, RedisStore,
    StoreBackend, StoreKind,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagewright")]
#[command(about = "Generate HTML pages from chained natural-language instructions")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "pagewright.toml")]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Give the model the nearest earlier page as a starting point
    #[arg(long, global = true)]
    reuse_content: bool,

    /// Store model output exactly as returned
    #[arg(long, global = true)]
    no_sanitize: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a new instruction and print its identifier
    Create {
        /// What the page should be
        instruction: String,

        /// Identifier of the instruction this one builds on
        #[arg(long)]
        previous: Option<String>,
    },

    /// Print the instruction stored for an identifier
    Show { id: String },

    /// Print the earlier instructions of an identifier, oldest first
    History { id: String },

    /// Print the page for an identifier, generating it on first request
    Fetch {
        id: String,

        /// Time the client last received the page (HTTP date or RFC 3339)
        #[arg(long)]
        if_modified_since: Option<String>,

        /// Entity tag of the client's copy; takes precedence over --if-modified-since
        #[arg(long)]
        if_none_match: Option<String>,

        /// Print model output while it is generated
        #[arg(long)]
        stream: bool,

        /// Write the page to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Record an instruction and generate its page right away
    New {
        instruction: String,

        #[arg(long)]
        previous: Option<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print the bundled system prompt
    SystemPrompt,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let mut config = Config::load(&cli.config)?;
    if cli.reuse_content {
        config.content.reuse_content = true;
    }
    if cli.no_sanitize {
        config.content.sanitize = false;
    }

    match cli.command {
        Command::SystemPrompt => {
            print!("{}", pagewright::system_prompt());
        }
        Command::Create {
            instruction,
            previous,
        } => {
            let generator = Generator::new(open_store(&config)?, (), config.content);
            let id = generator
                .create_instruction(&instruction, previous.as_deref())
                .await?;
            println!("{id}");
        }
        Command::Show { id } => {
            let generator = Generator::new(open_store(&config)?, (), config.content);
            println!("{}", generator.load_instruction(&id).await?);
        }
        Command::History { id } => {
            let generator = Generator::new(open_store(&config)?, (), config.content);
            let history = generator.history(&id).await?;
            let current = generator.load_instruction(&id).await?;
            for (n, instruction) in history.instructions.iter().chain([&current]).enumerate() {
                println!("{}. {}", n + 1, instruction);
            }
        }
        Command::Fetch {
            id,
            if_modified_since,
            if_none_match,
            stream,
            output,
        } => {
            let store = open_store(&config)?;
            let model = open_model(&config)?;
            let generator = Generator::new(store, model, config.content);
            let validator = if_none_match.or(if_modified_since);

            let fetched = if stream {
                // Raw output goes to stderr so stdout only ever carries the cleaned page.
                let mut stderr = std::io::stderr();
                let mut echo = true;
                generator
                    .stream_artifact(&id, validator.as_deref(), |chunk| {
                        if !echo {
                            return;
                        }
                        if let Err(e) = stderr
                            .write_all(chunk.as_bytes())
                            .and_then(|()| stderr.flush())
                        {
                            warn!(error = %e, "failed to echo model output, continuing without it");
                            echo = false;
                        }
                    })
                    .await?
            } else {
                generator.fetch_artifact(&id, validator.as_deref()).await?
            };

            match fetched {
                Fetched::NotModified => eprintln!("Not modified: {id}"),
                Fetched::Page(page) => emit_page(&page, output.as_deref())?,
            }
        }
        Command::New {
            instruction,
            previous,
            output,
        } => {
            let store = open_store(&config)?;
            let model = open_model(&config)?;
            let generator = Generator::new(store, model, config.content);

            let id = generator
                .create_instruction(&instruction, previous.as_deref())
                .await?;
            eprintln!("Created {id}");
            if let Fetched::Page(page) = generator.fetch_artifact(&id, None).await? {
                emit_page(&page, output.as_deref())?;
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<StoreBackend> {
    match config.store.backend {
        StoreKind::Memory => {
            warn!("using the in-memory store: content is lost when the process exits");
            Ok(StoreBackend::Memory(MemoryStore::new()))
        }
        StoreKind::Redis => {
            let store = RedisStore::new(&config.store.url)
                .with_context(|| format!("invalid store url '{}'", config.store.url))?;
            Ok(StoreBackend::Redis(store))
        }
    }
}

fn open_model(config: &Config) -> anyhow::Result<ModelBackend> {
    match config.model.backend {
        ModelKind::Openai => {
            let model = HttpModel::new(config.model.http_config())?;
            info!(model = %model.model_name(), endpoint = %config.model.endpoint, "using chat model");
            Ok(ModelBackend::Http(model))
        }
    }
}

fn emit_page(page: &Page, output: Option<&Path>) -> anyhow::Result<()> {
    if let Some(last_modified) = page.last_modified_http() {
        info!(last_modified = %last_modified, etag = %page.etag, cache_control = page.cache_control, "page ready");
    }
    match output {
        Some(path) => std::fs::write(path, &page.html)
            .with_context(|| format!("failed to write page to '{}'", path.display()))?,
        None => println!("{}", page.html),
    }
    Ok(())
}
