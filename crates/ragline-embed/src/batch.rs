use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ragline_core::{Embedding, EmbeddingError, EmbeddingProvider, KvCache};
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;

pub const DEFAULT_EMBEDDING_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Counters of one `embed_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub requested: usize,
    pub cache_hits: usize,
    pub computed: usize,
    pub duplicates: usize,
}

/// Stored form of a cached embedding. Bits keep the vector exact.
#[derive(Serialize, Deserialize)]
struct CachedEmbedding {
    text: String,
    bits: Vec<u32>,
}

/// Embeds texts through the cache: lookup, dedup misses, one provider call,
/// write-through, reassemble in input order.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl BatchProcessor {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<dyn KvCache>) -> Self {
        Self { provider, cache, ttl: DEFAULT_EMBEDDING_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub async fn embed_one(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        self.embed_batch_with_stats(texts).await.map(|(vectors, _)| vectors)
    }

    pub async fn embed_batch_with_stats(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Embedding>, BatchStats), EmbeddingError> {
        let mut stats = BatchStats { requested: texts.len(), ..BatchStats::default() };
        if texts.is_empty() {
            return Ok((Vec::new(), stats));
        }

        let mut resolved: HashMap<&str, Embedding> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut misses: Vec<&str> = Vec::new();
        for text in texts {
            if !seen.insert(text.as_str()) {
                stats.duplicates += 1;
                continue;
            }
            match self.lookup(text).await {
                Some(vector) => {
                    stats.cache_hits += 1;
                    resolved.insert(text.as_str(), vector);
                }
                None => misses.push(text.as_str()),
            }
        }

        if !misses.is_empty() {
            let inputs: Vec<String> = misses.iter().map(|s| (*s).to_string()).collect();
            let vectors = self.provider.embed_batch(&inputs).await?;
            if vectors.len() != inputs.len() {
                return Err(EmbeddingError::CountMismatch { expected: inputs.len(), got: vectors.len() });
            }
            let dim = self.provider.dimension();
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(EmbeddingError::DimensionMismatch { expected: dim, got: bad.len() });
            }
            stats.computed = vectors.len();
            for (text, vector) in misses.into_iter().zip(vectors) {
                self.store(text, &vector).await;
                resolved.insert(text, vector);
            }
        }

        tracing::debug!(
            model = self.provider.model_id(),
            requested = stats.requested,
            cache_hits = stats.cache_hits,
            computed = stats.computed,
            duplicates = stats.duplicates,
            "embedding batch resolved"
        );

        let out = texts
            .iter()
            .map(|t| {
                resolved
                    .get(t.as_str())
                    .cloned()
                    .ok_or_else(|| {
                        EmbeddingError::Provider(format!("no vector resolved for input of {} bytes", t.len()))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((out, stats))
    }

    async fn lookup(&self, text: &str) -> Option<Embedding> {
        let key = CacheKey::embedding(self.provider.model_id(), text);
        let bytes = match self.cache.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "embedding cache read failed, treating as miss");
                return None;
            }
        };
        let entry: CachedEmbedding = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable embedding cache entry");
                return None;
            }
        };
        if entry.text != text || entry.bits.len() != self.provider.dimension() {
            tracing::warn!(key = %key, "embedding cache entry does not match request");
            return None;
        }
        Some(entry.bits.into_iter().map(f32::from_bits).collect())
    }

    async fn store(&self, text: &str, vector: &[f32]) {
        let key = CacheKey::embedding(self.provider.model_id(), text);
        let entry = CachedEmbedding {
            text: text.to_string(),
            bits: vector.iter().map(|x| x.to_bits()).collect(),
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode embedding cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set_with_ttl(key.as_str(), bytes, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "embedding cache write failed");
        }
    }
}
