//! Agent module - control loop, conversation state, prompts, and LLM client
//!
//! The `RagAgent` state machine sequences the language model and the
//! retriever for one question; `LanguageModel` is the seam both the
//! production OpenRouter client and test doubles implement.

mod client;
mod conversation;
pub mod prompts;
mod state_machine;
mod types;

pub use client::{LanguageModel, OpenRouterClient};
pub use conversation::Conversation;
pub use prompts::{PromptTemplate, Prompts};
pub use state_machine::{RagAgent, RunOutcome};
pub use types::*;

#[cfg(test)]
pub(crate) use state_machine::tests::{FixedRetriever, ScriptedLlm};
