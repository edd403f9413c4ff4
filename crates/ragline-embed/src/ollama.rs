use std::time::Duration;

use async_trait::async_trait;
use ragline_core::config::EmbeddingConfig;
use ragline_core::{Embedding, EmbeddingError, EmbeddingProvider};
use serde::{Deserialize, Serialize};

/// Embeddings from a local Ollama server (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    model_id: String,
    dim: usize,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::InvalidConfig("embedding.model is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            model_id: format!("ollama:{}:d{}", config.model, config.dimension),
            dim: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_request(&self, input: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest { model: &self.model, input })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!("HTTP {status}: {body}")));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("invalid embed response: {e}")))?;
        Ok(parsed.embeddings)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout(e.to_string())
    } else {
        EmbeddingError::Provider(e.to_string())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_request(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
                return Err(EmbeddingError::DimensionMismatch { expected: self.dim, got: bad.len() });
            }
            out.extend(vectors);
        }
        tracing::debug!(model = %self.model, count = out.len(), "ollama embeddings computed");
        Ok(out)
    }
}
