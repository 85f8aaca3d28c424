//! pgvector-backed retriever
//!
//! Read-only view over the `documents` table populated by the ingestion
//! pipeline: `(content TEXT, metadata JSONB, embedding VECTOR)`. Writes go
//! through the pipeline, never through this service.

use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};

use super::{Passage, Retriever};

/// Retriever over an ETL-populated pgvector table
pub struct PgVectorRetriever {
    pool: PgPool,
    embedder: Arc<dyn EmbeddingProvider>,
    table: String,
}

impl PgVectorRetriever {
    /// Connect and verify the table is reachable
    pub async fn connect(
        config: &RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let url = config
            .database_url
            .as_ref()
            .ok_or_else(|| Error::Config("retrieval.database_url is not set".into()))?;

        // Table names cannot be bound as parameters; reject anything that
        // is not a plain identifier before it reaches a query string.
        if !is_identifier(&config.table) {
            return Err(Error::Config(format!(
                "retrieval.table is not a valid identifier: {:?}",
                config.table
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url.expose_secret())
            .await?;

        let (rows,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {}", config.table))
            .fetch_one(&pool)
            .await?;
        info!("pgvector store connected table={} rows={}", config.table, rows);

        Ok(PgVectorRetriever {
            pool,
            embedder,
            table: config.table.clone(),
        })
    }
}

#[async_trait]
impl Retriever for PgVectorRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        let query_embedding = self.embedder.embed(query).await?;
        let query_vec = Vector::from(query_embedding);

        let sql = format!(
            "SELECT content, metadata FROM {} ORDER BY embedding <=> $1 LIMIT $2",
            self.table
        );
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(&sql)
            .bind(query_vec)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(content, metadata)| passage_from_row(content, &metadata))
            .collect())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

/// Map a `(content, metadata)` row onto a passage.
fn passage_from_row(content: String, metadata: &serde_json::Value) -> Passage {
    Passage {
        source: metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        title: metadata
            .get("title")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        page: metadata.get("page").and_then(json_to_i64),
        chunk_id: metadata
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        text: content,
    }
}

/// Page metadata arrives as a JSON number or a stringified number.
fn json_to_i64(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_passage_from_full_metadata() {
        let metadata = json!({
            "source": "policy.pdf",
            "title": "Refund Policy",
            "page": 3,
            "chunk_id": "17"
        });
        let passage = passage_from_row("Refunds take 14 days.".into(), &metadata);

        assert_eq!(passage.source, "policy.pdf");
        assert_eq!(passage.title.as_deref(), Some("Refund Policy"));
        assert_eq!(passage.page, Some(3));
        assert_eq!(passage.chunk_id.as_deref(), Some("17"));
    }

    #[test]
    fn test_passage_from_sparse_metadata() {
        let passage = passage_from_row("text".into(), &json!({}));
        assert_eq!(passage.source, "unknown");
        assert_eq!(passage.title, None);
        assert_eq!(passage.page, None);
    }

    #[test]
    fn test_page_accepts_stringified_numbers() {
        assert_eq!(json_to_i64(&json!(3)), Some(3));
        assert_eq!(json_to_i64(&json!("12")), Some(12));
        assert_eq!(json_to_i64(&json!("")), None);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_identifier("documents"));
        assert!(is_identifier("doc_chunks2"));
        assert!(!is_identifier("1documents"));
        assert!(!is_identifier("docs; drop table users"));
        assert!(!is_identifier(""));
    }
}
