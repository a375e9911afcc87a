//! # docchat CLI
//!
//! The `docchat` binary talks to a retrieval-augmented chat service: it
//! uploads documents, asks questions, and manages the indexed corpus.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat ask "<q>"` | Ask one question and print the answer with its badges (`--auto-enrich` / `--no-auto-enrich` override the config) |
//! | `docchat chat` | Interactive session (`/up`, `/down [comment]`, `/quit`) |
//! | `docchat docs list` | Paginated document table |
//! | `docchat docs show <id>` | Show one document |
//! | `docchat docs chunks <id>` | Browse a document's chunks |
//! | `docchat docs reindex` | Reindex pending or chosen documents |
//! | `docchat docs delete <ids>...` | Delete documents, settling every id |
//! | `docchat upload <files>...` | Upload files |
//! | `docchat feedback <query_id>` | Rate an answer |
//! | `docchat config` | Print the effective configuration |
//!
//! Logs go to stderr and honour `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docchat::{chat, client, config, docs, progress, upload};
use docchat_core::backend::Backend;
use docchat_core::models::Rating;

/// docchat: ask questions over your documents from the terminal.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "docchat: ask questions over your documents from the terminal",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    /// Log at debug level (overrides `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question.
    ///
    /// The answer is revealed progressively, followed by confidence,
    /// origin, and source badges.
    Ask {
        query: String,

        /// Let the service pull in web sources when local documents fall short.
        #[arg(long)]
        auto_enrich: bool,

        /// Answer from local documents only, even if `chat.auto_enrich` is set.
        #[arg(long, conflicts_with = "auto_enrich")]
        no_auto_enrich: bool,
    },

    /// Start an interactive chat session.
    Chat {
        #[arg(long)]
        auto_enrich: bool,

        #[arg(long, conflicts_with = "auto_enrich")]
        no_auto_enrich: bool,
    },

    /// Manage indexed documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Upload documents (.pdf .txt .doc .docx .md).
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Progress output: off, human, or json (stderr). Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Rate an answer by its query id.
    Feedback {
        query_id: String,

        #[arg(long, conflicts_with = "down", required_unless_present = "down")]
        up: bool,

        #[arg(long)]
        down: bool,

        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Print the effective configuration with the API key masked.
    Config,
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents, newest first.
    List {
        /// Filename search.
        #[arg(long)]
        q: Option<String>,

        /// Status filter: uploaded, processed, or failed.
        #[arg(long)]
        status: Option<String>,

        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: u64,
    },

    /// Show one document.
    Show { id: String },

    /// Browse a document's chunks.
    Chunks {
        id: String,

        #[arg(long, default_value_t = 1)]
        page: u64,

        /// Show full chunk text instead of previews.
        #[arg(long)]
        text: bool,
    },

    /// Reindex documents.
    ///
    /// With `--pending`, reindexes every uploaded or failed document.
    /// Otherwise force-reindexes the given ids, clearing their vectors first.
    Reindex {
        #[arg(long, conflicts_with = "ids")]
        pending: bool,

        ids: Vec<String>,
    },

    /// Delete documents. Every id is attempted; failures are counted.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Leave the document's vectors in the index.
        #[arg(long)]
        keep_vectors: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("docchat=debug,docchat_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("docchat=info,docchat_core=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_or_minimal(&cli.config)?.with_env();

    if let Commands::Config = cli.command {
        let text = toml::to_string_pretty(&cfg.redacted()).context("Failed to render config")?;
        print!("{}", text);
        return Ok(());
    }

    let (http, _settings) = client::connect(&cfg)?;
    let backend: Arc<dyn Backend> = http;

    match cli.command {
        Commands::Ask {
            query,
            auto_enrich,
            no_auto_enrich,
        } => {
            let enrich = chat::enrich_override(auto_enrich, no_auto_enrich);
            chat::run_ask(&cfg, backend, &query, enrich).await?;
        }
        Commands::Chat {
            auto_enrich,
            no_auto_enrich,
        } => {
            let enrich = chat::enrich_override(auto_enrich, no_auto_enrich);
            chat::run_chat(&cfg, backend, enrich).await?;
        }
        Commands::Docs { action } => match action {
            DocsAction::List { q, status, page } => {
                docs::run_list(&cfg, backend, q.as_deref(), status.as_deref(), page).await?;
            }
            DocsAction::Show { id } => {
                docs::run_show(backend, &id).await?;
            }
            DocsAction::Chunks { id, page, text } => {
                docs::run_chunks(&cfg, backend, &id, page, text).await?;
            }
            DocsAction::Reindex { pending, ids } => {
                docs::run_reindex(&cfg, backend, pending, &ids).await?;
            }
            DocsAction::Delete { ids, keep_vectors } => {
                docs::run_delete(&cfg, backend, &ids, keep_vectors).await?;
            }
        },
        Commands::Upload { files, progress } => {
            let mode = progress::ProgressMode::from_flag(progress.as_deref())?;
            upload::run_upload(backend, &files, mode).await?;
        }
        Commands::Feedback {
            query_id,
            up,
            down: _,
            comment,
        } => {
            let rating = if up { Rating::Up } else { Rating::Down };
            chat::run_feedback(backend, &query_id, rating, &comment).await?;
        }
        Commands::Config => {
            // Handled above (before connecting)
            unreachable!()
        }
    }

    Ok(())
}
