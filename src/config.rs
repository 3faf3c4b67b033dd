//! Configuration file parsing.
//!
//! Tabula reads a TOML file (default `./config/tabula.toml`). Every
//! section except `[db]` is optional and every key has a default, so a
//! minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/tabula.sqlite"
//! ```
//!
//! [`load_config`] parses and validates the file; invalid values are
//! reported before any database or provider is touched.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub relationships: RelationshipsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages returned by document retrieval.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// First-stage candidates fetched per requested result.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    /// Table profiles used as context for code generation.
    #[serde(default = "default_profile_k")]
    pub profile_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            overfetch_factor: default_overfetch_factor(),
            profile_k: default_profile_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_overfetch_factor() -> usize {
    3
}
fn default_profile_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; defaults to the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_embedding_provider(),
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

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
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
pub struct RerankerConfig {
    /// `none` keeps first-stage order; `http` calls a cross-encoder service.
    #[serde(default = "default_reranker_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_reranker_provider(),
            url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_reranker_provider() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled` or `openai` (any OpenAI-compatible endpoint).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_description_temperature")]
    pub description_temperature: f32,
    #[serde(default = "default_query_temperature")]
    pub query_temperature: f32,
    #[serde(default = "default_chat_temperature")]
    pub chat_temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            url: default_llm_url(),
            model: None,
            api_key_env: default_llm_api_key_env(),
            description_temperature: default_description_temperature(),
            query_temperature: default_query_temperature(),
            chat_temperature: default_chat_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_description_temperature() -> f32 {
    0.1
}
fn default_query_temperature() -> f32 {
    0.4
}
fn default_chat_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    /// The only directory `read_csv` may read from.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sandbox_timeout(),
            memory_limit_mb: default_memory_limit_mb(),
            data_root: default_data_root(),
        }
    }
}

fn default_sandbox_timeout() -> u64 {
    10
}
fn default_memory_limit_mb() -> usize {
    256
}
fn default_data_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationshipsConfig {
    /// Distinct values per column compared when testing overlap.
    #[serde(default = "default_max_distinct_values")]
    pub max_distinct_values: usize,
}

impl Default for RelationshipsConfig {
    fn default() -> Self {
        Self {
            max_distinct_values: default_max_distinct_values(),
        }
    }
}

fn default_max_distinct_values() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Capacity of the token channel behind each streaming response.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_stream_buffer() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.overfetch_factor < 1 {
        bail!("retrieval.overfetch_factor must be >= 1");
    }
    if config.retrieval.profile_k < 1 {
        bail!("retrieval.profile_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "hash" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or hash.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
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
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.reranker.provider.as_str() {
        "none" => {}
        "http" => {
            if config.reranker.url.is_none() {
                bail!("reranker.url must be specified when provider is 'http'");
            }
        }
        other => bail!("Unknown reranker provider: '{}'. Must be none or http.", other),
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => bail!("Unknown llm provider: '{}'. Must be disabled or openai.", other),
    }
    for (name, t) in [
        ("description_temperature", config.llm.description_temperature),
        ("query_temperature", config.llm.query_temperature),
        ("chat_temperature", config.llm.chat_temperature),
    ] {
        if !(0.0..=2.0).contains(&t) {
            bail!("llm.{} must be in [0.0, 2.0]", name);
        }
    }

    if config.sandbox.timeout_secs == 0 {
        bail!("sandbox.timeout_secs must be > 0");
    }
    if config.relationships.max_distinct_values == 0 {
        bail!("relationships.max_distinct_values must be > 0");
    }
    if config.server.stream_buffer == 0 {
        bail!("server.stream_buffer must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse_config("[db]\npath = \"./data/t.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1200);
        assert_eq!(config.chunking.chunk_overlap, 300);
        assert_eq!(config.retrieval.overfetch_factor, 3);
        assert_eq!(config.retrieval.profile_k, 3);
        assert_eq!(config.reranker.provider, "none");
        assert!(!config.llm.is_enabled());
        assert_eq!(config.relationships.max_distinct_values, 10_000);
        assert_eq!(config.server.stream_buffer, 32);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").is_ok());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[reranker]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[reranker]\nprovider = \"http\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[llm]\nprovider = \"openai\"\n").is_err());
    }
}
