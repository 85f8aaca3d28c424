//! # OpenRAG
//!
//! A citation-grounded retrieval-augmented question answering service built with Rust.
//!
//! ## Features
//!
//! - **Semantic Response Cache:** embedding-similarity lookup of previously
//!   answered questions, with TTL and capacity bounds
//! - **Agentic Control Loop:** decide / retrieve / grade / rewrite / generate
//!   state machine with a hard rewrite budget
//! - **Deterministic Citations:** structured `[CITATION n]` blocks parsed from
//!   retrieval output, never from model prose
//! - **Pluggable Retrieval:** pgvector-backed store for production, in-memory
//!   store for development and tests

pub mod agent;
pub mod cache;
pub mod citations;
pub mod config;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
