//! Configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars (`__` separates sections, e.g. `APP_RETRIEVAL__TOP_K`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub struct Config {
    figment: Figment,
    settings: Settings,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(figment, &env_name)
    }

    /// Builds a config from an already assembled figment.
    pub fn from_figment(figment: Figment, env_name: &str) -> anyhow::Result<Self> {
        let settings: Settings = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load settings: {}", e))?;
        let config = Self { figment, settings };
        config.validate_for_env(env_name)?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        self.settings.validate()?;
        if matches!(env, "prod" | "production") && self.settings.generation.requires_api_key() {
            let has_key = self
                .settings
                .generation
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty());
            if !has_key {
                anyhow::bail!(
                    "generation.api_key is required for provider '{}' in {}",
                    self.settings.generation.provider,
                    env
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be greater than 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.retrieval.alpha) {
            anyhow::bail!("retrieval.alpha must be within [0, 1], got {}", self.retrieval.alpha);
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Fixed,
    Sentence,
    Paragraph,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(ChunkStrategy::Fixed),
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            other => Err(format!("unknown chunking strategy: {other}")),
        }
    }
}

/// Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub strategy: ChunkStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 500, chunk_overlap: 50, strategy: ChunkStrategy::Fixed }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hash` or `ollama`.
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// Output size of the hash embedder; checked against remote models.
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "hash-384".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 384,
            batch_size: 32,
            timeout_secs: 30,
            cache_ttl_secs: 30 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    pub use_hybrid: bool,
    pub alpha: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5, score_threshold: 0.7, use_hybrid: false, alpha: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget of the retrieved context.
    pub max_tokens: usize,
    /// Overrides the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_tokens: 2000, system_prompt: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// `ollama`, `openai`, `deepseek` or `openai_compat`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationConfig {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self.provider.as_str(), "ollama")
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 120,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub response_cache: bool,
    pub response_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true, max_entries: 10_000, response_cache: false, response_ttl_secs: 1800 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

/// Expands `$VAR`, `${VAR}` and a leading `~` in a CLI path argument.
/// Unset variables leave the input untouched; the result is not canonicalised.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
