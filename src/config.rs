//! TOML configuration.
//!
//! Every command takes a single config file (`--config`, default
//! `./config/toolbox.toml`). Only `[db]` and `[chunking]` are required; all
//! other sections fall back to defaults that keep network-backed features
//! (embeddings, generation) disabled.
//!
//! ```toml
//! [db]
//! path = "./data/toolbox.sqlite"
//!
//! [chunking]
//! max_tokens = 700
//! overlap_tokens = 60
//!
//! [embedding]
//! provider = "gemini"
//! model = "text-embedding-004"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.1"
//!
//! [datasets.agent_memory]
//! retention_days = 90
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::Dataset;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub datasets: HashMap<String, DatasetPolicy>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Gemini API root or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,
    /// Number of retrieved results placed into the prompt by `ask`.
    #[serde(default = "default_context_chunks")]
    pub context_chunks: i64,
    /// Character budget for the context blocks `ask` sends to the model.
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_gen_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gen_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_gen_max_tokens(),
            context_chunks: default_context_chunks(),
            context_chars: default_context_chars(),
            max_retries: default_gen_retries(),
            timeout_secs: default_gen_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_gen_max_tokens() -> u32 {
    1024
}
fn default_context_chunks() -> i64 {
    6
}
fn default_context_chars() -> usize {
    12_000
}
fn default_gen_retries() -> u32 {
    2
}
fn default_gen_timeout() -> u64 {
    120
}

/// Retention policy for one dataset (`[datasets.<name>]`).
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DatasetPolicy {
    #[serde(default)]
    pub max_documents: Option<i64>,
    #[serde(default)]
    pub retention_days: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    /// When set, file tools may only touch paths under this directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_read_bytes: default_max_read_bytes(),
            max_search_results: default_max_search_results(),
        }
    }
}

fn default_max_read_bytes() -> u64 {
    1024 * 1024
}
fn default_max_search_results() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_run_timeout() -> u64 {
    60
}
fn default_max_output_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
    #[serde(default = "default_web_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            endpoint: default_web_endpoint(),
            max_results: default_web_max_results(),
            timeout_secs: default_web_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_web_endpoint() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}
fn default_web_max_results() -> usize {
    10
}
fn default_web_timeout() -> u64 {
    15
}
fn default_user_agent() -> String {
    format!("agent-toolbox/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PermissionsConfig {
    /// Tools that run without an explicit `allow: true`.
    #[serde(default)]
    pub auto_allow: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Effective retention policy for a dataset, applying built-in defaults.
    pub fn dataset_policy(&self, dataset: Dataset) -> DatasetPolicy {
        let builtin = match dataset {
            Dataset::ContextFlow => DatasetPolicy {
                max_documents: Some(500),
                retention_days: None,
            },
            _ => DatasetPolicy::default(),
        };
        match self.datasets.get(dataset.as_str()) {
            Some(user) => DatasetPolicy {
                max_documents: user.max_documents.or(builtin.max_documents),
                retention_days: user.retention_days.or(builtin.retention_days),
            },
            None => builtin,
        }
    }

    /// A config pointing at `db_path` with every optional section defaulted.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig {
                max_tokens: 700,
                overlap_tokens: 0,
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            datasets: HashMap::new(),
            server: ServerConfig::default(),
            files: FilesConfig::default(),
            system: SystemConfig::default(),
            web: WebConfig::default(),
            permissions: PermissionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Roughly a thousand years; keeps the cutoff arithmetic in range.
pub const MAX_RETENTION_DAYS: i64 = 365_000;

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "gemini" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, gemini, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "ollama" | "lmstudio" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, ollama, or lmstudio.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    for (name, policy) in &config.datasets {
        name.parse::<Dataset>()
            .with_context(|| format!("invalid [datasets.{}] section", name))?;
        if policy.max_documents.is_some_and(|n| n < 1) {
            bail!("datasets.{}.max_documents must be >= 1", name);
        }
        if policy
            .retention_days
            .is_some_and(|d| !(1..=MAX_RETENTION_DAYS).contains(&d))
        {
            bail!(
                "datasets.{}.retention_days must be between 1 and {}",
                name,
                MAX_RETENTION_DAYS
            );
        }
    }

    Ok(())
}
