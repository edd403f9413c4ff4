//! Domain types shared by the ingestion and query paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Scalar metadata attached to chunks and fragments.
pub type Metadata = Map<String, Value>;

/// Equality filter over top-level payload keys of a vector point.
pub type Filter = Map<String, Value>;

/// Payload stored next to each vector in the index.
pub type Payload = Map<String, Value>;

/// A dense embedding. All vectors from one model instance share a length.
pub type Embedding = Vec<f32>;

/// Payload keys written at ingestion time and read back by the retriever.
pub mod payload_keys {
    pub const CONTENT: &str = "content";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TENANT_ID: &str = "tenant_id";
    pub const METADATA: &str = "metadata";
}

/// A bounded segment of one document's extracted text.
///
/// - `index`: position within the document, contiguous `0..n`
/// - `total_in_collection`: number of chunks produced for the document
/// - `metadata`: caller-supplied metadata, merged in unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub index: usize,
    pub total_in_collection: usize,
    pub metadata: Metadata,
}

/// Vector point id for chunk `index` of `document_id`.
pub fn chunk_point_id(document_id: &str, index: usize) -> String {
    format!("{document_id}_{index}")
}

/// Name of the tenant-scoped collection in the vector index.
pub fn tenant_collection(tenant_id: &str) -> String {
    format!("tenant_{tenant_id}")
}

/// A retrieved, scored piece of previously chunked document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub content: String,
    pub score: f32,
    pub document_id: String,
    pub chunk_id: String,
    pub metadata: Metadata,
}

/// A vector with its id and payload, as written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Embedding,
    pub payload: Payload,
}

/// A raw nearest-neighbour match returned by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Parameters of a nearest-neighbour search.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub vector: Embedding,
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged chat message sent to the generation model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Token counters reported by a generation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Sampling parameters for a generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: None }
    }
}

/// A single-shot completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

/// How the fragments of a query were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Vector,
    /// Hybrid retrieval was requested but ran vector-only with no threshold.
    HybridDegraded,
}

/// The answer record assembled once per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: Uuid,
    pub query: String,
    pub answer: String,
    /// Exactly the fragments the generation was conditioned on, in prompt order.
    pub fragments: Vec<RetrievedFragment>,
    pub model_used: String,
    pub tokens_used: u32,
    pub usage: TokenUsage,
    pub processing_time_secs: f64,
    pub retrieval_mode: RetrievalMode,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cached: bool,
}
