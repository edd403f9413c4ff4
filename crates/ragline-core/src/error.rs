use thiserror::Error;

use crate::stage::QueryStage;

/// Failures of an embedding provider or of the batch processor around it.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0}")]
    Provider(String),

    #[error("embedding request timed out: {0}")]
    Timeout(String),

    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("vector dimension {got} does not match model dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid embedding configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector dimension {got} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector index backend failed: {0}")]
    Backend(String),
}

/// Key/value cache failure. Always recovered at the call site.
#[derive(Debug, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Generation client failure, kept apart from retrieval so callers can
/// apply a different retry policy.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation provider failed: {0}")]
    Provider(String),

    #[error("rate limited by generation provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("generation request timed out: {0}")]
    Timeout(String),

    #[error("could not parse generation response: {0}")]
    ResponseParse(String),

    #[error("generation stream failed: {0}")]
    Streaming(String),

    #[error("invalid generation configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector search failed: {0}")]
    Index(#[from] VectorIndexError),

    #[error("hybrid alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f32),
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("fragment {chunk_id} has a non-finite score")]
    NonFiniteScore { chunk_id: String },
}

/// Ingestion-path failures propagated through the embedding step.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file format: {extension} (supported: {supported})")]
    UnsupportedFormat { extension: String, supported: String },

    #[error("failed to parse document: {0}")]
    Parsing(String),

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid chunking configuration: {0}")]
    InvalidChunking(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] VectorIndexError),
}

/// A failed query, tagged with the stage the pipeline was in.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("context compression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}

impl PipelineError {
    pub fn stage(&self) -> QueryStage {
        match self {
            PipelineError::Retrieval(_) => QueryStage::Retrieving,
            PipelineError::Compression(_) => QueryStage::Compressing,
            PipelineError::Generation(_) => QueryStage::Generating,
        }
    }

    /// Rate limiting and timeouts of the generation provider are transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Generation(
                GenerationError::RateLimited { .. } | GenerationError::Timeout(_)
            )
        )
    }
}
