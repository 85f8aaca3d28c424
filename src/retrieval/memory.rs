//! In-memory retriever for development and tests
//!
//! Loads pre-chunked passages (from a JSON file or directly from records),
//! embeds them once at startup, and answers queries with a cosine-ranked
//! scan. Not meant for production corpora.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::cache::cosine_similarity;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

use super::{Passage, Retriever};

/// A pre-chunked passage as stored on disk
#[derive(Debug, Clone, Deserialize)]
pub struct PassageRecord {
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub text: String,
}

/// Cosine-scan retriever over embedded passages
pub struct InMemoryRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: Vec<(Passage, Vec<f32>)>,
}

impl InMemoryRetriever {
    /// Build from records, embedding every passage up front
    pub async fn from_records(
        records: Vec<PassageRecord>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = embedder.embed_batch(texts).await?;

        let entries = records
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(idx, (record, embedding))| {
                let passage = Passage {
                    source: record.source,
                    title: record.title,
                    page: record.page,
                    // Chunk ids are assigned at load when the file has none.
                    chunk_id: record.chunk_id.or_else(|| Some(idx.to_string())),
                    text: record.text,
                };
                (passage, embedding)
            })
            .collect::<Vec<_>>();

        info!("In-memory store ready, {} passages embedded", entries.len());
        Ok(InMemoryRetriever { embedder, entries })
    }

    /// Build from a JSON file holding an array of passage records
    pub async fn from_file(
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<PassageRecord> = serde_json::from_str(&raw)?;
        Self::from_records(records, embedder).await
    }

    /// Number of loaded passages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(f32, &Passage)> = self
            .entries
            .iter()
            .map(|(passage, embedding)| (cosine_similarity(&query_embedding, embedding), passage))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, passage)| passage.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tests::StaticEmbedder;
    use std::collections::HashMap;

    fn record(source: &str, text: &str) -> PassageRecord {
        PassageRecord {
            source: source.to_string(),
            title: None,
            page: None,
            chunk_id: None,
            text: text.to_string(),
        }
    }

    fn embedder() -> Arc<StaticEmbedder> {
        Arc::new(StaticEmbedder::new(
            HashMap::from([
                ("rust ownership".to_string(), vec![1.0, 0.0]),
                ("tokio runtime".to_string(), vec![0.0, 1.0]),
                ("who owns a value?".to_string(), vec![0.9, 0.1]),
            ]),
            2,
        ))
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let retriever = InMemoryRetriever::from_records(
            vec![
                record("book/ch4.md", "rust ownership"),
                record("book/ch8.md", "tokio runtime"),
            ],
            embedder(),
        )
        .await
        .unwrap();

        let passages = retriever.search("who owns a value?", 2).await.unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].source, "book/ch4.md");
        assert_eq!(passages[1].source, "book/ch8.md");
    }

    #[tokio::test]
    async fn test_k_truncates_results() {
        let retriever = InMemoryRetriever::from_records(
            vec![
                record("a.md", "rust ownership"),
                record("b.md", "tokio runtime"),
            ],
            embedder(),
        )
        .await
        .unwrap();

        let passages = retriever.search("who owns a value?", 1).await.unwrap();
        assert_eq!(passages.len(), 1);
    }

    #[tokio::test]
    async fn test_chunk_ids_assigned_at_load() {
        let retriever = InMemoryRetriever::from_records(
            vec![
                record("a.md", "rust ownership"),
                record("b.md", "tokio runtime"),
            ],
            embedder(),
        )
        .await
        .unwrap();

        let ids: Vec<Option<String>> = retriever
            .entries
            .iter()
            .map(|(p, _)| p.chunk_id.clone())
            .collect();
        assert_eq!(ids, vec![Some("0".to_string()), Some("1".to_string())]);
    }

    #[tokio::test]
    async fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"source": "a.md", "text": "rust ownership"}}]"#
        )
        .unwrap();

        let retriever = InMemoryRetriever::from_file(file.path(), embedder())
            .await
            .unwrap();
        assert_eq!(retriever.len(), 1);
    }
}
