//! Semantic response cache
//!
//! Stores previous query-answer pairs and checks incoming queries against
//! them using cosine similarity on embeddings. A sufficiently similar query
//! returns the cached answer directly, skipping the whole control loop.
//!
//! Entries are keyed by a normalized-query hash for lifecycle bookkeeping
//! (overwrite, invalidate); lookup is a similarity scan, never a key match.
//! The scan strategy sits behind `SimilarityScorer` so an ANN index can
//! replace the linear scan without touching callers.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::citations::Citation;
use crate::config::CacheConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// One cached (query, answer, citations) triple
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub embedding: Vec<f32>,
    pub created_at: Instant,
    pub hit_count: u64,
}

/// Cosine similarity, `0.0` when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Strategy for matching a query embedding against live entries.
pub trait SimilarityScorer: Send + Sync {
    /// Return the best-scoring entry key and its similarity.
    fn best_match(&self, query: &[f32], entries: &HashMap<u64, CacheEntry>) -> Option<(u64, f32)>;
}

/// Full scan over all live entries. Fine at the configured capacity;
/// swap in an index-backed scorer when the store outgrows it.
pub struct LinearScanScorer;

impl SimilarityScorer for LinearScanScorer {
    fn best_match(&self, query: &[f32], entries: &HashMap<u64, CacheEntry>) -> Option<(u64, f32)> {
        let mut best: Option<(u64, f32)> = None;
        for (key, entry) in entries {
            let sim = cosine_similarity(query, &entry.embedding);
            if best.map_or(true, |(_, best_sim)| sim > best_sim) {
                best = Some((*key, sim));
            }
        }
        best
    }
}

/// Embedding-based semantic cache with cosine-similarity lookup
pub struct SemanticCache {
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: Box<dyn SimilarityScorer>,
    threshold: f32,
    max_entries: usize,
    ttl: Duration,
    store: RwLock<HashMap<u64, CacheEntry>>,
}

impl SemanticCache {
    /// Create a cache with the default linear-scan scorer
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, config: &CacheConfig) -> Self {
        Self::with_scorer(embedder, config, Box::new(LinearScanScorer))
    }

    /// Create a cache with a custom scoring strategy
    pub fn with_scorer(
        embedder: Arc<dyn EmbeddingProvider>,
        config: &CacheConfig,
        scorer: Box<dyn SimilarityScorer>,
    ) -> Self {
        SemanticCache {
            embedder,
            scorer,
            threshold: config.similarity_threshold,
            max_entries: config.max_entries,
            ttl: config.ttl,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Return `(answer, citations)` on a similarity hit, `None` on a miss.
    ///
    /// Increments the matched entry's hit count. Expired entries are swept
    /// before the scan, so an all-expired cache behaves as an empty one.
    pub async fn get(&self, query: &str) -> Result<Option<(String, Vec<Citation>)>> {
        if self.store.read().await.is_empty() {
            return Ok(None);
        }

        // Embed outside the lock; only the scan itself is exclusive.
        let query_vec = self.embedder.embed(query).await?;

        let mut store = self.store.write().await;
        Self::sweep_expired(&mut store, self.ttl);

        let Some((key, similarity)) = self.scorer.best_match(&query_vec, &store) else {
            return Ok(None);
        };

        if similarity < self.threshold {
            debug!(similarity, threshold = self.threshold, "semantic cache miss");
            return Ok(None);
        }

        let Some(entry) = store.get_mut(&key) else {
            return Ok(None);
        };
        entry.hit_count += 1;
        debug!(similarity, hits = entry.hit_count, "semantic cache hit");
        Ok(Some((entry.answer.clone(), entry.citations.clone())))
    }

    /// Insert or overwrite the entry for this query.
    ///
    /// Evicts the globally oldest entry while over capacity.
    pub async fn put(&self, query: &str, answer: &str, citations: Vec<Citation>) -> Result<()> {
        let embedding = self.embedder.embed(query).await?;

        let mut store = self.store.write().await;
        Self::sweep_expired(&mut store, self.ttl);
        store.insert(
            Self::key(query),
            CacheEntry {
                query: query.to_string(),
                answer: answer.to_string(),
                citations,
                embedding,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
        Self::enforce_capacity(&mut store, self.max_entries);
        Ok(())
    }

    /// Remove the entry for the exact (normalized) query.
    pub async fn invalidate(&self, query: &str) -> bool {
        self.store.write().await.remove(&Self::key(query)).is_some()
    }

    /// Remove all entries.
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    /// Count of live (non-expired) entries.
    pub async fn size(&self) -> usize {
        let mut store = self.store.write().await;
        Self::sweep_expired(&mut store, self.ttl);
        store.len()
    }

    /// Normalized-query hash: trimmed, lowercased, hashed to u64.
    fn key(query: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.trim().to_lowercase().hash(&mut hasher);
        hasher.finish()
    }

    fn sweep_expired(store: &mut HashMap<u64, CacheEntry>, ttl: Duration) {
        store.retain(|_, entry| entry.created_at.elapsed() < ttl);
    }

    fn enforce_capacity(store: &mut HashMap<u64, CacheEntry>, max_entries: usize) {
        while store.len() > max_entries {
            let Some(oldest) = store
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| *key)
            else {
                return;
            };
            store.remove(&oldest);
        }
    }

    #[cfg(test)]
    pub(crate) async fn hit_count_of(&self, query: &str) -> Option<u64> {
        self.store
            .read()
            .await
            .get(&Self::key(query))
            .map(|e| e.hit_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tests::StaticEmbedder;

    fn embedder(vectors: &[(&str, Vec<f32>)]) -> Arc<StaticEmbedder> {
        let map: HashMap<String, Vec<f32>> = vectors
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Arc::new(StaticEmbedder::new(map, 2))
    }

    fn config(threshold: f32, max_entries: usize, ttl_secs: u64) -> CacheConfig {
        CacheConfig {
            similarity_threshold: threshold,
            max_entries,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        // Zero-norm vectors never divide by zero.
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_empty_cache_misses_without_embedding() {
        let emb = embedder(&[]);
        let cache = SemanticCache::new(emb.clone(), &config(0.92, 8, 3600));

        assert!(cache.get("anything").await.unwrap().is_none());
        assert_eq!(emb.call_count(), 0);
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        // Entry along the x axis; probes at cosine 0.92 and 0.9199.
        let emb = embedder(&[
            ("cached question", vec![1.0, 0.0]),
            ("at threshold", vec![0.92, 0.391_918_36]),
            ("below threshold", vec![0.9199, 0.392_156_86]),
        ]);
        let cache = SemanticCache::new(emb, &config(0.92, 8, 3600));
        cache
            .put("cached question", "the answer", Vec::new())
            .await
            .unwrap();

        let hit = cache.get("at threshold").await.unwrap();
        assert_eq!(hit.map(|(a, _)| a).as_deref(), Some("the answer"));

        assert!(cache.get("below threshold").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hit_increments_hit_count() {
        let emb = embedder(&[("q", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(emb, &config(0.92, 8, 3600));
        cache.put("q", "a", Vec::new()).await.unwrap();

        cache.get("q").await.unwrap();
        cache.get("q").await.unwrap();
        assert_eq!(cache.hit_count_of("q").await, Some(2));
    }

    #[tokio::test]
    async fn test_put_is_idempotent_per_normalized_query() {
        let emb = embedder(&[
            ("What is Rust?", vec![1.0, 0.0]),
            ("  what is rust?  ", vec![1.0, 0.0]),
        ]);
        let cache = SemanticCache::new(emb, &config(0.92, 8, 3600));

        cache
            .put("What is Rust?", "first", Vec::new())
            .await
            .unwrap();
        cache
            .put("  what is rust?  ", "second", Vec::new())
            .await
            .unwrap();

        assert_eq!(cache.size().await, 1);
        let (answer, _) = cache.get("What is Rust?").await.unwrap().unwrap();
        assert_eq!(answer, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let emb = embedder(&[
            ("q1", vec![1.0, 0.0]),
            ("q2", vec![0.0, 1.0]),
            ("q3", vec![-1.0, 0.0]),
            ("q4", vec![0.0, -1.0]),
        ]);
        let cache = SemanticCache::new(emb, &config(0.92, 3, 3600));

        for q in ["q1", "q2", "q3", "q4"] {
            cache.put(q, q, Vec::new()).await.unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.size().await, 3);
        // q1 was oldest and is gone; the rest still hit exactly.
        assert!(cache.get("q1").await.unwrap().is_none());
        assert!(cache.get("q2").await.unwrap().is_some());
        assert!(cache.get("q4").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let emb = embedder(&[("q", vec![1.0, 0.0])]);
        let cache = SemanticCache::new(emb, &config(0.92, 8, 60));
        cache.put("q", "a", Vec::new()).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("q").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("q").await.unwrap().is_none());
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let emb = embedder(&[("q1", vec![1.0, 0.0]), ("q2", vec![0.0, 1.0])]);
        let cache = SemanticCache::new(emb, &config(0.92, 8, 3600));
        cache.put("q1", "a1", Vec::new()).await.unwrap();
        cache.put("q2", "a2", Vec::new()).await.unwrap();

        assert!(cache.invalidate(" Q1 ").await);
        assert!(!cache.invalidate("q1").await);
        assert_eq!(cache.size().await, 1);

        cache.clear().await;
        assert_eq!(cache.size().await, 0);
    }
}
