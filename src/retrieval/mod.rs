//! Retrieval collaborators
//!
//! A `Retriever` returns ranked passages for a query; `render_citation_blocks`
//! turns them into the structured `[CITATION n]` text the language model sees
//! and the citation extractor later parses. Two backends: pgvector against the
//! ETL-populated `documents` table, and an in-memory store for development.

mod memory;
mod pgvector;

pub use memory::{InMemoryRetriever, PassageRecord};
pub use pgvector::PgVectorRetriever;

use async_trait::async_trait;
use serde_json::json;

use crate::agent::{FunctionDefinition, ToolDefinition};
use crate::error::Result;

/// Name of the single tool offered to the model at the decide step
pub const RETRIEVER_TOOL_NAME: &str = "search_knowledge_base";

/// One retrieved passage with its provenance metadata
#[derive(Debug, Clone)]
pub struct Passage {
    /// Source URL or file path
    pub source: String,
    /// Document title
    pub title: Option<String>,
    /// 1-based page number (PDF sources)
    pub page: Option<i64>,
    /// Stable chunk identifier assigned at ingestion
    pub chunk_id: Option<String>,
    /// Full passage text
    pub text: String,
}

/// Ordered passage lookup for a query
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return the `k` most relevant passages, best first
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

/// Tool definition offered to the model
pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: RETRIEVER_TOOL_NAME.to_string(),
            description: "Search and return information from the knowledge base with citations."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }),
        },
    }
}

/// Maximum snippet length in characters
const SNIPPET_CHARS: usize = 1024;

/// Render passages as structured citation blocks.
///
/// One record per passage, blank line between records, so the downstream
/// extractor can parse provenance deterministically.
pub fn render_citation_blocks(passages: &[Passage]) -> String {
    let blocks: Vec<String> = passages
        .iter()
        .enumerate()
        .map(|(i, passage)| {
            let n = i + 1;
            let snippet: String = passage
                .text
                .chars()
                .take(SNIPPET_CHARS)
                .collect::<String>()
                .replace('\n', " ")
                .trim()
                .to_string();

            format!(
                "[CITATION {n}]\n\
                 SOURCE: {source}\n\
                 TITLE: {title}\n\
                 PAGE: {page}\n\
                 CHUNK: {chunk}\n\
                 SNIPPET: {snippet}\n\
                 CONTENT:\n\
                 {content}",
                source = passage.source,
                title = passage.title.as_deref().unwrap_or(""),
                page = passage
                    .page
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                chunk = passage
                    .chunk_id
                    .clone()
                    .unwrap_or_else(|| n.to_string()),
                content = passage.text,
            )
        })
        .collect();

    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::extract_citations;
    use crate::agent::Message;

    fn passage(source: &str, text: &str) -> Passage {
        Passage {
            source: source.to_string(),
            title: Some("Title".to_string()),
            page: Some(3),
            chunk_id: Some("c-1".to_string()),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_render_and_extract_round_trip() {
        let passages = vec![
            passage("policy.pdf", "Refunds are accepted within 14 days."),
            Passage {
                source: "faq.html".to_string(),
                title: None,
                page: None,
                chunk_id: None,
                text: "See the\nrefund policy.".to_string(),
            },
        ];

        let block = render_citation_blocks(&passages);
        let citations = extract_citations(&[Message::tool("call-1", &block)]);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source, "policy.pdf");
        assert_eq!(citations[0].page, Some(3));
        assert_eq!(citations[0].chunk.as_deref(), Some("c-1"));
        // Second record falls back to its 1-based index as the chunk id.
        assert_eq!(citations[1].chunk.as_deref(), Some("2"));
        // Newlines collapse to spaces in the snippet.
        assert_eq!(citations[1].snippet.as_deref(), Some("See the refund policy."));
    }

    #[test]
    fn test_snippet_is_truncated() {
        let long_text = "x".repeat(3000);
        let block = render_citation_blocks(&[passage("doc.md", &long_text)]);

        let snippet_line = block
            .lines()
            .find(|l| l.starts_with("SNIPPET: "))
            .unwrap();
        assert_eq!(snippet_line.len(), "SNIPPET: ".len() + SNIPPET_CHARS);
    }

    #[test]
    fn test_empty_passages_render_empty() {
        assert_eq!(render_citation_blocks(&[]), "");
    }
}
