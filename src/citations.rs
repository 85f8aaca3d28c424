//! Citation records and deterministic extraction
//!
//! Retrieval emits structured `[CITATION n]` blocks (see `retrieval`); this
//! module parses them back out of a finished conversation. Extraction scans
//! newest to oldest and stops at the first message carrying both the
//! `[CITATION` marker and a `SOURCE:` field, which skips final assistant
//! answers that merely echo the marker token without structured fields.

use serde::{Deserialize, Serialize};

use crate::agent::{Message, Role};

/// Provenance record for one retrieved passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Source URL or file path
    pub source: String,
    /// Document title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// 1-based page number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    /// Stable chunk identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    /// Leading excerpt of the passage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Recognized per-record field keys (case-sensitive)
const FIELD_KEYS: [&str; 5] = ["SOURCE", "TITLE", "PAGE", "CHUNK", "SNIPPET"];

/// Parse citations from the most recent qualifying message.
///
/// A message qualifies when its content contains both `[CITATION` and
/// `SOURCE:`. Only the first qualifying message (scanning backward) is
/// parsed; an unparseable qualifying message yields an empty list rather
/// than falling through to older messages.
pub fn extract_citations(messages: &[Message]) -> Vec<Citation> {
    for message in messages.iter().rev() {
        let text = &message.content;
        if text.contains("[CITATION") && text.contains("SOURCE:") {
            return parse_blocks(text);
        }
    }
    Vec::new()
}

/// Extract citations only when retrieval actually ran.
///
/// A direct answer from the decide step produces no tool message, and its
/// citations are empty by construction even if the model happened to emit
/// marker-shaped text.
pub fn extract_if_retrieved(messages: &[Message]) -> Vec<Citation> {
    if messages.iter().any(|m| m.role == Role::Tool) {
        extract_citations(messages)
    } else {
        Vec::new()
    }
}

/// Parse all `[CITATION n]` records out of one text block.
fn parse_blocks(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut current: Option<RecordFields> = None;

    for line in text.lines() {
        if is_marker(line) {
            if let Some(record) = current.take() {
                if let Some(citation) = record.finish() {
                    citations.push(citation);
                }
            }
            current = Some(RecordFields::default());
            continue;
        }

        if let Some(ref mut record) = current {
            if let Some((key, value)) = split_field(line) {
                record.set(key, value);
            }
        }
    }

    if let Some(record) = current {
        if let Some(citation) = record.finish() {
            citations.push(citation);
        }
    }

    citations
}

/// `[CITATION <n>]` with n a positive integer
fn is_marker(line: &str) -> bool {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix("[CITATION") else {
        return false;
    };
    let Some(inner) = rest.strip_suffix(']') else {
        return false;
    };
    let inner = inner.trim();
    !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit())
}

/// Split a `KEY: value` line on a recognized key.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    if FIELD_KEYS.contains(&key) {
        Some((key, value))
    } else {
        None
    }
}

/// Accept integer or numeric-with-fraction literals; anything else is absent.
fn parse_page(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f as i64)
}

/// Raw field values accumulated while walking one record
#[derive(Default)]
struct RecordFields {
    source: Option<String>,
    title: Option<String>,
    page: Option<String>,
    chunk: Option<String>,
    snippet: Option<String>,
}

impl RecordFields {
    fn set(&mut self, key: &str, value: &str) {
        let value = value.trim().to_string();
        match key {
            "SOURCE" => self.source = Some(value),
            "TITLE" => self.title = Some(value),
            "PAGE" => self.page = Some(value),
            "CHUNK" => self.chunk = Some(value),
            "SNIPPET" => self.snippet = Some(value),
            _ => {}
        }
    }

    /// Records without a non-empty SOURCE are dropped.
    fn finish(self) -> Option<Citation> {
        let source = self.source.filter(|s| !s.is_empty())?;
        Some(Citation {
            source,
            title: self.title.filter(|s| !s.is_empty()),
            page: self.page.as_deref().and_then(parse_page),
            chunk: self.chunk.filter(|s| !s.is_empty()),
            snippet: self.snippet.filter(|s| !s.is_empty()),
        })
    }
}
