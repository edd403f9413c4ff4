use std::collections::HashMap;

use async_trait::async_trait;
use ragline_core::{Filter, Payload, SearchRequest, VectorIndex, VectorIndexError, VectorMatch, VectorPoint};
use tokio::sync::RwLock;

struct Collection {
    dimension: usize,
    points: Vec<VectorPoint>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn new(dimension: usize) -> Self {
        Self { dimension, points: Vec::new(), positions: HashMap::new() }
    }

    fn upsert(&mut self, point: VectorPoint) {
        match self.positions.get(&point.id) {
            Some(&pos) => self.points[pos] = point,
            None => {
                self.positions.insert(point.id.clone(), self.points.len());
                self.points.push(point);
            }
        }
    }

    fn remove(&mut self, ids: &[String]) -> usize {
        let before = self.points.len();
        self.points.retain(|p| !ids.contains(&p.id));
        self.positions = self.points.iter().enumerate().map(|(i, p)| (p.id.clone(), i)).collect();
        before - self.points.len()
    }
}

#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> Option<usize> {
        self.collections.read().await.get(collection).map(|c| c.points.len())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn matches_filter(payload: &Payload, filter: Option<&Filter>) -> bool {
    filter.map_or(true, |f| f.iter().all(|(k, v)| payload.get(k) == Some(v)))
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn collection_exists(&self, name: &str) -> Result<bool, VectorIndexError> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> Result<(), VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::Backend("collection dimension must be > 0".into()));
        }
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            if existing.dimension != dimension {
                return Err(VectorIndexError::DimensionMismatch { expected: existing.dimension, got: dimension });
            }
            return Ok(());
        }
        collections.insert(name.to_string(), Collection::new(dimension));
        tracing::info!(collection = name, dimension, "collection created");
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<(), VectorIndexError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorIndexError::CollectionNotFound(collection.to_string()))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(VectorIndexError::DimensionMismatch { expected: target.dimension, got: bad.vector.len() });
        }
        let count = points.len();
        for point in points {
            target.upsert(point);
        }
        tracing::debug!(collection, count, total = target.points.len(), "points upserted");
        Ok(())
    }

    async fn search(&self, collection: &str, request: SearchRequest) -> Result<Vec<VectorMatch>, VectorIndexError> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| VectorIndexError::CollectionNotFound(collection.to_string()))?;
        if request.vector.len() != target.dimension {
            return Err(VectorIndexError::DimensionMismatch { expected: target.dimension, got: request.vector.len() });
        }

        let mut matches: Vec<VectorMatch> = target
            .points
            .iter()
            .filter(|p| matches_filter(&p.payload, request.filter.as_ref()))
            .map(|p| VectorMatch {
                id: p.id.clone(),
                score: cosine_similarity(&request.vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|m| request.score_threshold.map_or(true, |t| m.score >= t))
            .collect();
        // stable: equal scores keep insertion order
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(request.limit);
        Ok(matches)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), VectorIndexError> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| VectorIndexError::CollectionNotFound(collection.to_string()))?;
        let removed = target.remove(ids);
        tracing::debug!(collection, removed, "points deleted");
        Ok(())
    }
}
