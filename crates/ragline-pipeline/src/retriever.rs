use std::sync::Arc;

use ragline_core::types::payload_keys;
use ragline_core::{
    tenant_collection, Filter, Metadata, RetrievalError, RetrievalMode, RetrievedFragment,
    SearchRequest, VectorIndex, VectorMatch,
};
use ragline_embed::BatchProcessor;
use serde_json::Value;

/// Fragments of a hybrid request, tagged with how they were actually obtained.
#[derive(Debug, Clone)]
pub struct HybridRetrieval {
    pub fragments: Vec<RetrievedFragment>,
    pub mode: RetrievalMode,
}

/// Tenant-scoped semantic search over the vector index.
pub struct Retriever {
    embeddings: Arc<BatchProcessor>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embeddings: Arc<BatchProcessor>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// At most `top_k` fragments, each scoring at least `score_threshold`,
    /// in descending score order. Only the tenant's own collection is searched
    /// and the tenant filter overrides any caller filter on the same key.
    pub async fn retrieve(
        &self,
        query: &str,
        tenant_id: &str,
        top_k: usize,
        score_threshold: f32,
        filters: Option<&Filter>,
    ) -> Result<Vec<RetrievedFragment>, RetrievalError> {
        let collection = tenant_collection(tenant_id);
        if top_k == 0 || !self.index.collection_exists(&collection).await? {
            tracing::debug!(tenant_id, collection = %collection, "nothing to search");
            return Ok(Vec::new());
        }

        let vector = self.embeddings.embed_one(query).await?;

        let mut filter = filters.cloned().unwrap_or_default();
        filter.insert(payload_keys::TENANT_ID.into(), Value::String(tenant_id.to_string()));

        let request = SearchRequest {
            vector,
            limit: top_k,
            score_threshold: Some(score_threshold),
            filter: Some(filter),
        };
        let matches = self.index.search(&collection, request).await?;
        let raw = matches.len();

        let mut fragments: Vec<RetrievedFragment> = matches
            .into_iter()
            .filter(|m| m.score.is_finite() && m.score >= score_threshold)
            .map(to_fragment)
            .collect();
        fragments.sort_by(|a, b| b.score.total_cmp(&a.score));
        fragments.truncate(top_k);

        tracing::debug!(tenant_id, top_k, score_threshold, raw, kept = fragments.len(), "retrieval done");
        Ok(fragments)
    }

    /// Hybrid retrieval without a keyword channel: runs vector retrieval with
    /// the threshold forced to 0 and reports the degraded mode.
    pub async fn hybrid_retrieve(
        &self,
        query: &str,
        tenant_id: &str,
        top_k: usize,
        alpha: f32,
        filters: Option<&Filter>,
    ) -> Result<HybridRetrieval, RetrievalError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RetrievalError::InvalidAlpha(alpha));
        }
        tracing::warn!(tenant_id, alpha, "keyword channel unavailable, hybrid retrieval degraded to vector-only");
        let fragments = self.retrieve(query, tenant_id, top_k, 0.0, filters).await?;
        Ok(HybridRetrieval { fragments, mode: RetrievalMode::HybridDegraded })
    }
}

fn to_fragment(m: VectorMatch) -> RetrievedFragment {
    let text = |key: &str| m.payload.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let content = text(payload_keys::CONTENT);
    let document_id = text(payload_keys::DOCUMENT_ID);
    let metadata: Metadata = m
        .payload
        .get(payload_keys::METADATA)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    RetrievedFragment { content, score: m.score, document_id, chunk_id: m.id, metadata }
}
