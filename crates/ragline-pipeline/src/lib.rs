//! Query side of ragline: tenant-scoped retrieval, context compression,
//! prompt assembly and the orchestrator that drives a query through them.

pub mod compress;
pub mod pipeline;
pub mod prompt;
pub mod response_cache;
pub mod retriever;

pub use compress::{compress, estimate_tokens, CompressionStrategy, ContextCompressor};
pub use pipeline::{QueryRequest, QueryStream, RagPipeline, StreamChunk};
pub use prompt::{PromptBuilder, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_TEMPLATE};
pub use response_cache::ResponseCache;
pub use retriever::{HybridRetrieval, Retriever};
