//! # Agent Toolbox
//!
//! Local tool servers for LLM agents: a multi-dataset RAG store plus file,
//! system and web-search tools, all dispatched through one registry and
//! exposed over a CLI, a JSON HTTP API and MCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ ingest       │──▶│ chunk+embed  │──▶│  SQLite   │
//! │ text / files │   │ Gemini/Ollama│   │ FTS5+Vec  │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                             │ search / ask
//!            ┌────────────────────────────────┤
//!            ▼                                ▼
//!      ┌───────────┐   ┌──────────────┐   ┌──────────┐
//!      │   CLI     │──▶│ ToolRegistry │◀──│ HTTP/MCP │
//!      │ (toolbox) │   │ rag/files/   │   │  server  │
//!      └───────────┘   │ system/web   │   └──────────┘
//!                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! toolbox init
//! toolbox ingest agent_core ./notes
//! toolbox search "deployment" --mode hybrid
//! toolbox ask "how do we deploy?"
//! toolbox tool call file_read --param path=README.md
//! toolbox serve http
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Datasets, ingest items, chunks |
//! | [`error`] | Typed tool errors and status mapping |
//! | [`chunk`] | Paragraph-aware text chunking |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`ingest`] | Document upsert, chunking, inline embedding |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`embed_cmd`] | Embedding backfill and rebuild |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`get`] | Document retrieval |
//! | [`datasets`] | Stats, listing, deletion, retention pruning |
//! | [`generation`] | Ollama / LM Studio text generation |
//! | [`ask`] | Retrieval-augmented answers |
//! | [`tools`] | Tool trait, registry, permission gate, built-in tools |
//! | [`server`] | HTTP server |
//! | [`mcp`] | MCP bridge (HTTP and stdio) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | tracing subscriber setup |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod datasets;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod tools;
