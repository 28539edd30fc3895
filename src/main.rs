//! # Agent Toolbox CLI (`toolbox`)
//!
//! ## Usage
//!
//! ```bash
//! toolbox --config ./config/toolbox.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `toolbox init` | Create the SQLite database and run schema migrations |
//! | `toolbox ingest <dataset> [path]` | Ingest a file, a directory, or `--text` |
//! | `toolbox search "<query>"` | Search the store |
//! | `toolbox get <id>` | Print a document and its chunks |
//! | `toolbox delete <id>` | Delete one document |
//! | `toolbox list` | List documents |
//! | `toolbox datasets stats\|clear\|prune` | Dataset lifecycle |
//! | `toolbox embed pending\|rebuild` | Embedding maintenance |
//! | `toolbox ask "<question>"` | Answer from the store with citations |
//! | `toolbox tool list\|call` | Call any tool through the registry |
//! | `toolbox serve http\|stdio` | Start the HTTP or stdio MCP server |

use agent_toolbox::models::Dataset;
use agent_toolbox::search::SearchMode;
use agent_toolbox::tools::{ToolContext, ToolRegistry};
use agent_toolbox::{
    ask, config, datasets, embed_cmd, get, ingest, logging, mcp, migrate, search, server,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Local tool servers for LLM agents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "toolbox",
    about = "Agent Toolbox: a RAG store plus file, system and web tools for LLM agents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/toolbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a file, a directory, or inline text into a dataset.
    Ingest {
        /// Target dataset: `agent_core`, `context_flow` or `agent_memory`.
        dataset: Dataset,

        /// File or directory to ingest.
        path: Option<PathBuf>,

        /// Inline text to ingest instead of a path.
        #[arg(long, conflicts_with = "path")]
        text: Option<String>,

        /// Stable source identifier for inline text (re-ingesting replaces).
        #[arg(long, requires = "text")]
        source_id: Option<String>,

        #[arg(long, requires = "text")]
        title: Option<String>,

        /// Glob patterns for directory ingestion (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,
    },

    /// Search stored documents.
    Search {
        query: String,

        /// `keyword`, `semantic` or `hybrid`. Defaults to hybrid when
        /// embeddings are enabled, keyword otherwise.
        #[arg(long)]
        mode: Option<SearchMode>,

        #[arg(long)]
        dataset: Option<Dataset>,

        /// Only return documents updated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print a document by id.
    Get { id: String },

    /// Delete a document by id.
    Delete { id: String },

    /// List documents, most recently updated first.
    List {
        #[arg(long)]
        dataset: Option<Dataset>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Dataset statistics and lifecycle.
    Datasets {
        #[command(subcommand)]
        action: DatasetsAction,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Answer a question from the store, citing sources.
    Ask {
        question: String,

        #[arg(long)]
        dataset: Option<Dataset>,

        #[arg(long)]
        mode: Option<SearchMode>,
    },

    /// List or call tools.
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum DatasetsAction {
    /// Document, chunk and embedding counts per dataset.
    Stats,
    /// Delete every document in a dataset.
    Clear { dataset: Dataset },
    /// Apply retention and size limits now (all datasets when omitted).
    Prune { dataset: Option<Dataset> },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks whose embedding is missing or stale.
    Pending {
        #[arg(long)]
        dataset: Option<Dataset>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Count pending chunks without calling the provider.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        #[arg(long)]
        dataset: Option<Dataset>,

        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ToolAction {
    /// List registered tools.
    List,

    /// Call a tool and print its result as JSON.
    Call {
        name: String,

        /// Parameter as KEY=VALUE. VALUE is parsed as JSON when it can be,
        /// otherwise taken as a string. Repeatable.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Parameters as a JSON object. `--param` entries override keys.
        #[arg(long)]
        json: Option<String>,

        /// Permit tools that change state outside the store.
        #[arg(long)]
        allow: bool,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// JSON HTTP API plus MCP at `/mcp`.
    Http,
    /// MCP over stdin/stdout.
    Stdio,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn build_params(
    json: Option<String>,
    params: Vec<(String, String)>,
    allow: bool,
) -> anyhow::Result<Value> {
    let mut map = match json {
        Some(raw) => match serde_json::from_str(&raw).context("--json is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--json must be a JSON object"),
        },
        None => serde_json::Map::new(),
    };
    for (key, raw) in params {
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        map.insert(key, value);
    }
    if allow {
        map.insert("allow".to_string(), Value::Bool(true));
    }
    Ok(Value::Object(map))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            dataset,
            path,
            text,
            source_id,
            title,
            include,
        } => {
            ingest::run_ingest(&cfg, dataset, path.as_deref(), text, source_id, title, &include)
                .await?;
        }
        Commands::Search {
            query,
            mode,
            dataset,
            since,
            limit,
        } => {
            let mode = mode.unwrap_or_else(|| SearchMode::default_for(&cfg));
            search::run_search(&cfg, &query, mode, dataset, since.as_deref(), limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            datasets::run_delete(&cfg, &id).await?;
        }
        Commands::List {
            dataset,
            limit,
            offset,
        } => {
            datasets::run_list(&cfg, dataset, limit, offset).await?;
        }
        Commands::Datasets { action } => match action {
            DatasetsAction::Stats => datasets::run_stats(&cfg).await?,
            DatasetsAction::Clear { dataset } => datasets::run_clear(&cfg, dataset).await?,
            DatasetsAction::Prune { dataset } => datasets::run_prune(&cfg, dataset).await?,
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                dataset,
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, dataset, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild {
                dataset,
                batch_size,
            } => {
                embed_cmd::run_embed_rebuild(&cfg, dataset, batch_size).await?;
            }
        },
        Commands::Ask {
            question,
            dataset,
            mode,
        } => {
            ask::run_ask(&cfg, &question, dataset, mode).await?;
        }
        Commands::Tool { action } => {
            let registry = ToolRegistry::with_builtins();
            match action {
                ToolAction::List => {
                    for info in registry.infos() {
                        let gate = if info.requires_permission { " [allow]" } else { "" };
                        println!("{}{}  {}", info.name, gate, info.description);
                    }
                }
                ToolAction::Call {
                    name,
                    params,
                    json,
                    allow,
                } => {
                    let params = build_params(json, params, allow)?;
                    let ctx = ToolContext::new(Arc::new(cfg.clone()));
                    let result = registry.call(&name, params, &ctx).await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Http => server::run_server(&cfg).await?,
            ServeService::Stdio => mcp::serve_stdio(&cfg).await?,
        },
    }

    Ok(())
}
