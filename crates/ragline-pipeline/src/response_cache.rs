//! Memoised single-shot answers.
//!
//! Keys combine the tenant, the tenant's current epoch, and a digest of the
//! generation model, the request parameters and the query text. Bumping the epoch orphans every
//! earlier answer for that tenant; orphaned entries simply age out. A tenant
//! without a stored epoch gets a fresh one, so an evicted epoch can never
//! resurrect answers written under an older one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ragline_core::{KvCache, QueryResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::QueryRequest;

pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(1800);
const EPOCH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Serialize, Deserialize)]
struct CachedAnswer {
    query: String,
    result: QueryResult,
}

pub struct ResponseCache {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache, ttl: DEFAULT_RESPONSE_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Cached answer for `request` from `model` with a fresh `query_id` and `cached` set.
    pub async fn get(&self, request: &QueryRequest, model: &str) -> Option<QueryResult> {
        let key = self.key(request, model).await?;
        let bytes = match self.cache.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "response cache read failed, treating as miss");
                return None;
            }
        };
        let entry: CachedAnswer = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable response cache entry");
                return None;
            }
        };
        if entry.query != request.query {
            tracing::warn!(key = %key, "response cache key collision, ignoring entry");
            return None;
        }
        let mut result = entry.result;
        result.query_id = Uuid::new_v4();
        result.cached = true;
        tracing::debug!(key = %key, query_id = %result.query_id, "response cache hit");
        Some(result)
    }

    pub async fn put(&self, request: &QueryRequest, model: &str, result: &QueryResult) {
        let Some(key) = self.key(request, model).await else {
            return;
        };
        let entry = CachedAnswer { query: request.query.clone(), result: result.clone() };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not encode response cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set_with_ttl(&key, bytes, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "response cache write failed");
        }
    }

    /// Makes every answer cached so far for `tenant_id` unreachable.
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        let current = self.read_epoch(tenant_id).await.ok().flatten();
        let mut next = new_epoch();
        if current == Some(next) {
            next += 1;
        }
        match self.write_epoch(tenant_id, next).await {
            Ok(()) => tracing::info!(tenant_id, epoch = next, "response cache invalidated"),
            Err(e) => tracing::warn!(tenant_id, error = %e, "response cache invalidation failed"),
        }
    }

    /// `None` when the epoch cannot be read or written; the cache is then bypassed.
    async fn key(&self, request: &QueryRequest, model: &str) -> Option<String> {
        let epoch = match self.read_epoch(&request.tenant_id).await {
            Ok(Some(epoch)) => epoch,
            Ok(None) => {
                let epoch = new_epoch();
                if let Err(e) = self.write_epoch(&request.tenant_id, epoch).await {
                    tracing::warn!(
                        tenant_id = %request.tenant_id,
                        error = %e,
                        "could not initialise response cache epoch"
                    );
                    return None;
                }
                epoch
            }
            Err(e) => {
                tracing::warn!(tenant_id = %request.tenant_id, error = %e, "response cache epoch read failed");
                return None;
            }
        };
        Some(format!("resp:{}:{epoch}:{}", request.tenant_id, request_digest(request, model)))
    }

    async fn read_epoch(&self, tenant_id: &str) -> Result<Option<i64>, ragline_core::CacheError> {
        let bytes = self.cache.get(&epoch_key(tenant_id)).await?;
        Ok(bytes.and_then(|b| std::str::from_utf8(&b).ok()?.parse().ok()))
    }

    async fn write_epoch(&self, tenant_id: &str, epoch: i64) -> Result<(), ragline_core::CacheError> {
        self.cache
            .set_with_ttl(&epoch_key(tenant_id), epoch.to_string().into_bytes(), EPOCH_TTL.max(self.ttl))
            .await
    }
}

fn epoch_key(tenant_id: &str) -> String {
    format!("resp-epoch:{tenant_id}")
}

fn new_epoch() -> i64 {
    Utc::now().timestamp_micros()
}

/// blake3 over the model and every request field that can change the answer.
fn request_digest(request: &QueryRequest, model: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(request.top_k as u64).to_le_bytes());
    hasher.update(&request.score_threshold.to_bits().to_le_bytes());
    hasher.update(&request.temperature.to_bits().to_le_bytes());
    hasher.update(&request.max_tokens.map_or(u64::MAX, u64::from).to_le_bytes());
    hasher.update(&[u8::from(request.use_hybrid)]);
    hasher.update(&request.alpha.to_bits().to_le_bytes());
    if let Some(filters) = &request.filters {
        hasher.update(serde_json::Value::Object(filters.clone()).to_string().as_bytes());
    }
    hasher.update(&[0]);
    hasher.update(request.query.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_tracks_parameters() {
        let base = QueryRequest::new("what is rust", "acme");
        let same = QueryRequest::new("what is rust", "acme");
        assert_eq!(request_digest(&base, "m1"), request_digest(&same, "m1"));

        let other_k = QueryRequest { top_k: 3, ..QueryRequest::new("what is rust", "acme") };
        assert_ne!(request_digest(&base, "m1"), request_digest(&other_k, "m1"));

        let other_query = QueryRequest::new("what is go", "acme");
        assert_ne!(request_digest(&base, "m1"), request_digest(&other_query, "m1"));
    }

    #[test]
    fn digest_tracks_model() {
        let request = QueryRequest::new("what is rust", "acme");
        assert_ne!(request_digest(&request, "llama3"), request_digest(&request, "gpt-4o"));
        // model and query are separated, so shifting bytes between them changes the digest
        let shifted = QueryRequest::new("1what is rust", "acme");
        assert_ne!(request_digest(&request, "m1"), request_digest(&shifted, "m"));
    }
}
