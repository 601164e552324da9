//! # Semantic cache (L4)
//!
//! Sits in front of [`crate::multi_layer_cache::MultiLayerCache`] for
//! prompts that pass the response-cache cacheability predicate. Embeds the
//! prompt into a fixed 128-dimension vector, searches an in-memory index for
//! the nearest neighbor by cosine similarity, and on a hit above
//! `threshold` returns the value stored under that neighbor's L3 key.
//!
//! The embedding function is injected via [`Embedder`]. [`FeatureHashingEmbedder`]
//! is a deterministic fallback with no model dependency, suitable for tests
//! and for operators who have decided (see the project's design notes) that
//! a degraded semantic cache is preferable to none. Production deployments
//! should inject a real embedding client instead.

use crate::multi_layer_cache::MultiLayerCache;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const EMBEDDING_DIM: usize = 128;
pub type Embedding = [f32; EMBEDDING_DIM];

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Embedding;
}

/// Deterministic bag-of-words feature hashing: each token votes +1/-1 on a
/// bucket chosen by its hash, and the result is L2-normalized. Carries no
/// semantic information beyond token overlap, but is stable and dependency-free.
pub struct FeatureHashingEmbedder;

#[async_trait]
impl Embedder for FeatureHashingEmbedder {
    async fn embed(&self, text: &str) -> Embedding {
        let mut vector = [0f32; EMBEDDING_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash as usize) % EMBEDDING_DIM;
            let sign = if (hash >> 1) & 1 == 1 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

fn normalize(vector: &mut Embedding) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn embedding_key(embedding: &Embedding) -> String {
    let mut hasher = DefaultHasher::new();
    for v in embedding {
        v.to_bits().hash(&mut hasher);
    }
    format!("sem:{:016x}", hasher.finish())
}

struct IndexEntry {
    embedding: Embedding,
    l3_key: String,
}

pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    index: Mutex<Vec<IndexEntry>>,
    cache: Arc<MultiLayerCache>,
    threshold: f32,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<MultiLayerCache>, threshold: f32) -> Self {
        Self {
            embedder,
            index: Mutex::new(Vec::new()),
            cache,
            threshold,
        }
    }

    /// `get(prompt)` per SPEC_FULL §4.L4: embed, find the nearest neighbor
    /// in the index, and return its L3 value if similarity clears the
    /// threshold. A miss on the index, or a below-threshold best match,
    /// both count as a cache miss.
    pub async fn get(&self, prompt: &str) -> Option<String> {
        let embedding = self.embedder.embed(prompt).await;
        let best_key = {
            let index = self.index.lock().expect("semantic index lock poisoned");
            index
                .iter()
                .map(|entry| (cosine_similarity(&embedding, &entry.embedding), &entry.l3_key))
                .filter(|(sim, _)| *sim >= self.threshold)
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(_, key)| key.clone())
        };
        match best_key {
            Some(key) => self.cache.get(&key).await,
            None => None,
        }
    }

    /// `set(prompt, value, ttl)` per SPEC_FULL §4.L4: store the value in L3
    /// under a key derived from the embedding, and record the embedding in
    /// the index. Two concurrent `set`s on identical embeddings may race on
    /// which index entry wins; both point at semantically equivalent L3
    /// entries, so either outcome is correct.
    pub async fn set(&self, prompt: &str, value: String, ttl: Duration) {
        let embedding = self.embedder.embed(prompt).await;
        let l3_key = embedding_key(&embedding);
        self.cache.set(&l3_key, value, Some(ttl)).await;
        self.index
            .lock()
            .expect("semantic index lock poisoned")
            .push(IndexEntry { embedding, l3_key });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::multi_layer_cache::MemoryCache;

    fn make_cache() -> SemanticCache {
        let memory = Arc::new(MemoryCache::new(100, 100_000));
        let multi = Arc::new(MultiLayerCache::new(
            memory,
            InMemoryKv::new(),
            Duration::from_secs(60),
        ));
        SemanticCache::new(Arc::new(FeatureHashingEmbedder), multi, 0.95)
    }

    #[tokio::test]
    async fn returns_stored_value_for_identical_prompt() {
        let cache = make_cache();
        cache
            .set("What is 2+2?", "4".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("What is 2+2?").await.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn misses_for_dissimilar_prompt() {
        let cache = make_cache();
        cache
            .set("What is 2+2?", "4".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("Write me a sonnet about the ocean").await, None);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let mut v = [0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        v[1] = 1.0;
        normalize(&mut v);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
