use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Optional second model used only when a caller requests re-ranking.
    #[serde(default)]
    pub reranker: Option<EmbeddingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    400
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix applied before encoding document-mode text (asymmetric models).
    #[serde(default)]
    pub document_prefix: Option<String>,
    /// Prefix applied before encoding query-mode text.
    #[serde(default)]
    pub query_prefix: Option<String>,
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            document_prefix: None,
            query_prefix: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    validate_embedding(&config.embedding, "embedding")?;
    if let Some(ref reranker) = config.reranker {
        validate_embedding(reranker, "reranker")?;
    }

    Ok(config)
}

fn validate_embedding(config: &EmbeddingConfig, section: &str) -> Result<()> {
    if config.is_enabled() {
        if config.dims.is_none() || config.dims == Some(0) {
            anyhow::bail!(
                "{}.dims must be > 0 when provider is '{}'",
                section,
                config.provider
            );
        }
        if config.model.is_none() {
            anyhow::bail!(
                "{}.model must be specified when provider is '{}'",
                section,
                config.provider
            );
        }
    }

    match config.provider.as_str() {
        "disabled" | "openai" | "ollama" => Ok(()),
        other => anyhow::bail!(
            "Unknown {} provider: '{}'. Must be disabled, openai, or ollama.",
            section,
            other
        ),
    }
}
