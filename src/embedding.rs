//! Embedding generation
//!
//! `EmbeddingProvider` is the seam the cache and retrieval layers depend on.
//! The default implementation runs fastembed locally (model auto-downloads on
//! first use) behind `spawn_blocking`, and `CachedEmbedder` memoizes
//! text -> vector lookups with a moka cache so repeated queries (cache `get`
//! followed by `put`, duplicate questions) embed only once.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Output dimensionality, fixed system-wide
    fn dimensions(&self) -> usize;
}

/// Local embedding service wrapping fastembed
#[derive(Clone)]
pub struct FastembedProvider {
    model: Arc<TextEmbedding>,
    dimensions: usize,
}

impl FastembedProvider {
    /// Create a provider for the configured model
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_id = match config.model.as_str() {
            "multilingual-e5-small" => EmbeddingModel::MultilingualE5Small,
            "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported embedding model: {}",
                    other
                )))
            }
        };

        let model = TextEmbedding::try_new(
            InitOptions::new(model_id).with_show_download_progress(true),
        )
        .map_err(|e| Error::Embedding(format!("Failed to init embedding model: {}", e)))?;

        Ok(FastembedProvider {
            model: Arc::new(model),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| Error::Embedding(format!("Embedding error: {}", e)))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedding("No embedding returned".into()))
        })
        .await
        .map_err(|e| Error::Internal(format!("Embedding task join error: {}", e)))?
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();

        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| Error::Embedding(format!("Batch embedding error: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(format!("Embedding task join error: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Cache key helper: hash a string to u64
fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Memoizing wrapper around any `EmbeddingProvider`
#[derive(Clone)]
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    /// hash(text) -> vector
    cache: Cache<u64, Vec<f32>>,
}

impl CachedEmbedder {
    /// Wrap a provider with a TTL-bounded memoization cache
    pub fn new(inner: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        CachedEmbedder {
            inner,
            cache: Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(config.cache_ttl)
                .build(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = hash_key(text);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let embedding = self.inner.embed(text).await?;
        self.cache.insert(key, embedding.clone()).await;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        // Batch path is only hit at startup ingestion; no memoization needed.
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
