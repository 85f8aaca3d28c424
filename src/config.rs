//! Configuration loading and validation
//!
//! Settings come from an optional `openrag.toml` (or `.yaml`/`.json`) file in
//! the working directory, overlaid with `OPENRAG__*` environment variables
//! (double underscore separates nesting, e.g. `OPENRAG__LLM__API_KEY`).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub agent: AgentConfig,
    pub retrieval: RetrievalConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Language model provider configuration (OpenRouter-compatible API)
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// API key
    #[serde(default = "default_api_key")]
    pub api_key: SecretString,
    /// Base URL of the chat-completions API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Total time budget for retrying transient API failures, in seconds
    #[serde(default = "default_retry_budget")]
    pub retry_budget_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: default_api_key(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout(),
            retry_budget_secs: default_retry_budget(),
        }
    }
}

/// Local embedding model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimensions
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
    /// Capacity of the text -> vector memoization cache
    #[serde(default = "default_embedding_cache_capacity")]
    pub cache_capacity: u64,
    /// TTL of memoized embeddings
    #[serde(default = "default_embedding_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            model: default_embedding_model(),
            dimensions: default_embedding_dims(),
            cache_capacity: default_embedding_cache_capacity(),
            cache_ttl: default_embedding_cache_ttl(),
        }
    }
}

/// Semantic response cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Minimum cosine similarity for a cache hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Maximum number of live entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Entry time-to-live
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            similarity_threshold: default_similarity_threshold(),
            max_entries: default_max_entries(),
            ttl: default_cache_ttl(),
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Maximum question rewrites before answer generation is forced
    #[serde(default = "default_max_rewrites")]
    pub max_rewrites: u32,
    /// Passages fetched per retrieval call
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_rewrites: default_max_rewrites(),
            top_k: default_top_k(),
        }
    }
}

/// Retrieval backend configuration
///
/// Backend selection mirrors deployment reality: a database URL means the
/// ETL-populated pgvector table, otherwise a local passages file is loaded
/// into the in-memory store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// PostgreSQL connection URL (pgvector backend)
    pub database_url: Option<SecretString>,
    /// Table holding embedded document chunks
    pub table: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Path to a JSON file of pre-chunked passages (in-memory backend)
    pub passages_file: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            database_url: None,
            table: default_table(),
            max_connections: default_max_connections(),
            passages_file: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_key() -> SecretString {
    SecretString::from("")
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_model() -> String {
    "google/gemini-2.5-flash".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_retry_budget() -> u64 {
    20
}

fn default_embedding_model() -> String {
    "multilingual-e5-small".to_string()
}

fn default_embedding_dims() -> usize {
    384
}

fn default_embedding_cache_capacity() -> u64 {
    1000
}

fn default_embedding_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_similarity_threshold() -> f32 {
    0.92
}

fn default_max_entries() -> usize {
    2048
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_rewrites() -> u32 {
    3
}

fn default_top_k() -> usize {
    4
}

fn default_table() -> String {
    "documents".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from `openrag.*` file (optional) and environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("openrag").required(false))
            .add_source(
                config::Environment::with_prefix("OPENRAG")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges and required settings.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "API key required. Set OPENRAG__LLM__API_KEY in the environment.".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(Error::Config(format!(
                "cache.similarity_threshold must be in [0, 1], got {}",
                self.cache.similarity_threshold
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::Config("cache.max_entries must be > 0".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(Error::Config("embedding.dimensions must be > 0".into()));
        }
        if self.agent.top_k == 0 {
            return Err(Error::Config("agent.top_k must be > 0".into()));
        }
        Ok(())
    }
}
