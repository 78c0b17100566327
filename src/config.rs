use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{KbError, Result};

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
    pub rerank: RerankConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// Minimum final score for a result to be returned. 0 disables the cut.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Weight of the lexical stage. 0 runs dense-only retrieval; any
    /// positive value enables the stemmed full-text stage.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Reciprocal-rank-fusion constant. Larger flattens rank influence,
    /// smaller sharpens it.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_count: default_candidate_count(),
            threshold: default_threshold(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_candidate_count() -> usize {
    30
}
fn default_threshold() -> f32 {
    0.15
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Inputs per embedding request. Kept well under the remote service's
    /// 128-input per-request limit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "voyage-3".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    96
}
fn default_api_key_env() -> String {
    "VOYAGE_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://api.voyageai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_rerank_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: default_rerank_enabled(),
            model: default_rerank_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_enabled() -> bool {
    true
}
fn default_rerank_model() -> String {
    "rerank-2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the file-store gateway exposing `/storage/files`.
    pub base_url: String,
    /// Environment variable holding the gateway API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_list_timeout_secs() -> u64 {
    30
}
fn default_download_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        KbError::Config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| KbError::Config(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(KbError::Config("chunking.chunk_size must be > 0".into()));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(KbError::Config(
            "chunking.overlap must be < chunking.chunk_size".into(),
        ));
    }
    if config.retrieval.top_k == 0 {
        return Err(KbError::Config("retrieval.top_k must be >= 1".into()));
    }
    if !(0.0..=1.0).contains(&config.retrieval.lexical_weight) {
        return Err(KbError::Config(
            "retrieval.lexical_weight must be in [0.0, 1.0]".into(),
        ));
    }
    if config.retrieval.threshold < 0.0 {
        return Err(KbError::Config("retrieval.threshold must be >= 0".into()));
    }
    if config.embedding.dims == 0 {
        return Err(KbError::Config("embedding.dims must be > 0".into()));
    }
    if config.embedding.batch_size == 0 {
        return Err(KbError::Config("embedding.batch_size must be > 0".into()));
    }
    Ok(())
}
