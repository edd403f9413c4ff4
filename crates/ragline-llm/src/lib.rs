//! Generation clients.
//!
//! Every client speaks JSON over HTTP with `reqwest` and streams line-framed
//! bodies: Ollama sends NDJSON, OpenAI-compatible servers and Anthropic send
//! SSE. Streams
//! are lazy, so dropping a [`TextStream`](ragline_core::TextStream) drops the
//! response body and aborts the request.

pub mod anthropic;
mod http;
pub mod ollama;
pub mod openai_compat;

use std::sync::Arc;
use std::time::Duration;

use ragline_core::config::GenerationConfig;
use ragline_core::{GenerationClient, GenerationError};

pub use anthropic::{AnthropicClient, ANTHROPIC_BASE_URL};
pub use ollama::OllamaClient;
pub use openai_compat::{OpenAiCompatClient, DEEPSEEK_BASE_URL, OPENAI_BASE_URL};

pub fn create_generation_client(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationClient>, GenerationError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let api_key = || {
        config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::InvalidConfig(format!("{} API key is required", config.provider)))
    };

    let client: Arc<dyn GenerationClient> = match config.provider.to_ascii_lowercase().as_str() {
        "ollama" => Arc::new(OllamaClient::new(&config.model, config.base_url.as_deref(), timeout)?),
        "openai" => Arc::new(OpenAiCompatClient::new(
            "openai",
            &config.model,
            api_key()?,
            config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            timeout,
        )?),
        "deepseek" => Arc::new(OpenAiCompatClient::new(
            "deepseek",
            &config.model,
            api_key()?,
            config.base_url.as_deref().unwrap_or(DEEPSEEK_BASE_URL),
            timeout,
        )?),
        "anthropic" => Arc::new(AnthropicClient::new(&config.model, api_key()?, config.base_url.as_deref(), timeout)?),
        "openai_compat" => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                GenerationError::InvalidConfig("openai_compat requires generation.base_url".into())
            })?;
            Arc::new(OpenAiCompatClient::new("openai_compat", &config.model, api_key()?, base_url, timeout)?)
        }
        other => {
            return Err(GenerationError::InvalidConfig(format!("unsupported generation provider: {other}")))
        }
    };
    tracing::info!(provider = %config.provider, model = %config.model, "generation client ready");
    Ok(client)
}
