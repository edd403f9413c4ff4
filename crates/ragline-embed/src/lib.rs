pub mod batch;
pub mod cache;
pub mod hash;
pub mod ollama;

use std::sync::Arc;

use ragline_core::config::{CacheConfig, EmbeddingConfig};
use ragline_core::{EmbeddingError, EmbeddingProvider, KvCache};

pub use batch::{BatchProcessor, BatchStats, DEFAULT_EMBEDDING_TTL};
pub use cache::{CacheKey, MemoryCache, NoopCache};
pub use hash::HashEmbedder;
pub use ollama::OllamaEmbedder;

pub fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.to_ascii_lowercase().as_str() {
        "hash" => {
            tracing::info!(dimension = config.dimension, "using hash embedder");
            Ok(Arc::new(HashEmbedder::new(config.dimension)?))
        }
        "ollama" => {
            tracing::info!(model = %config.model, base_url = %config.base_url, "using ollama embedder");
            Ok(Arc::new(OllamaEmbedder::new(config)?))
        }
        other => Err(EmbeddingError::InvalidConfig(format!("unknown embedding provider: {other}"))),
    }
}

pub fn create_cache(config: &CacheConfig) -> Arc<dyn KvCache> {
    if config.enabled {
        Arc::new(MemoryCache::new(config.max_entries))
    } else {
        Arc::new(NoopCache)
    }
}
