pub mod config;
pub mod error;
pub mod stage;
pub mod traits;
pub mod types;

pub use config::{Config, Settings};
pub use error::{
    CacheError, CompressionError, EmbeddingError, GenerationError, IngestError, PipelineError,
    RetrievalError, VectorIndexError,
};
pub use stage::QueryStage;
pub use traits::{EmbeddingProvider, GenerationClient, KvCache, TextStream, VectorIndex};
pub use types::*;
