use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{CacheError, EmbeddingError, GenerationError, VectorIndexError};
use crate::types::{
    Completion, Embedding, GenerationParams, PromptMessage, SearchRequest, VectorMatch,
    VectorPoint,
};

/// Incremental text of a streamed generation. Dropping it cancels the
/// underlying request.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

/// Text embedding backend.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`EmbeddingProvider::dimension`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier used to partition the embedding cache.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError>;
}

/// Named collections of vectors with payloads.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self, name: &str) -> Result<bool, VectorIndexError>;

    async fn create_collection(&self, name: &str, dimension: usize)
        -> Result<(), VectorIndexError>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>)
        -> Result<(), VectorIndexError>;

    /// Matches sorted by descending score, at most `request.limit`.
    async fn search(
        &self,
        collection: &str,
        request: SearchRequest,
    ) -> Result<Vec<VectorMatch>, VectorIndexError>;

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), VectorIndexError>;
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<Completion, GenerationError>;

    /// Starts a streamed generation. Errors before the first byte are
    /// returned directly; later failures arrive as stream items.
    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<TextStream, GenerationError>;
}

/// Byte-valued key/value store with per-entry expiry.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
