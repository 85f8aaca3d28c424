//! Retrieval-grading control loop
//!
//! A finite-state machine that answers one question:
//!
//! ```text
//! Decide ──answer──────────────────────────▶ Complete
//!   │ tool call
//!   ▼
//! Retrieve ──▶ Grade ──relevant──▶ Generate ──▶ Complete
//!                │ not relevant
//!                ▼
//!             Rewrite ──▶ Decide        (bounded by the rewrite budget)
//! ```
//!
//! The grader is advisory: any output other than an exact "yes" — including
//! malformed text or a grader transport error — fails toward reformulation,
//! never toward answering on bad context. The rewrite budget guarantees
//! termination; when it runs out, answer generation is forced with whatever
//! context was last retrieved.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::client::LanguageModel;
use crate::agent::conversation::Conversation;
use crate::agent::prompts::Prompts;
use crate::agent::types::{Decision, Message};
use crate::citations::{extract_if_retrieved, Citation};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::retrieval::{render_citation_blocks, tool_definition, Retriever, RETRIEVER_TOOL_NAME};

/// States of the control loop
enum AgentState {
    /// Ask the model to answer directly or request retrieval
    Decide {
        conversation: Conversation,
        rewrites_left: u32,
    },
    /// Execute the requested retrieval tool call
    Retrieve {
        conversation: Conversation,
        call: RetrieverCall,
        rewrites_left: u32,
    },
    /// Judge whether the retrieved context is relevant
    Grade {
        conversation: Conversation,
        rewrites_left: u32,
    },
    /// Reformulate the question and loop back
    Rewrite {
        conversation: Conversation,
        rewrites_left: u32,
    },
    /// Produce the final answer from the retrieved context
    Generate { conversation: Conversation },
    /// Terminal
    Complete {
        conversation: Conversation,
        answer: String,
    },
}

/// A retrieval request extracted from the model's tool call
struct RetrieverCall {
    id: String,
    query: String,
}

/// The result of one control-loop run
#[derive(Debug)]
pub struct RunOutcome {
    /// Final answer text
    pub answer: String,
    /// Citations parsed from the last retrieval output
    pub citations: Vec<Citation>,
    /// Full message history of the run
    pub conversation: Conversation,
}

/// Orchestrates one question through decide / retrieve / grade / rewrite /
/// generate against the language model and the retriever.
pub struct RagAgent {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    prompts: Prompts,
    config: AgentConfig,
}

impl RagAgent {
    /// Create a new agent
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        config: AgentConfig,
    ) -> Result<Self> {
        Ok(RagAgent {
            llm,
            retriever,
            prompts: Prompts::new()?,
            config,
        })
    }

    /// Run the loop for one question until it terminates.
    pub async fn run(&self, question: &str) -> Result<RunOutcome> {
        let mut state = AgentState::Decide {
            conversation: Conversation::new(question),
            rewrites_left: self.config.max_rewrites,
        };

        loop {
            state = match state {
                AgentState::Decide {
                    conversation,
                    rewrites_left,
                } => self.handle_decide(conversation, rewrites_left).await?,
                AgentState::Retrieve {
                    conversation,
                    call,
                    rewrites_left,
                } => {
                    self.handle_retrieve(conversation, call, rewrites_left)
                        .await?
                }
                AgentState::Grade {
                    conversation,
                    rewrites_left,
                } => self.handle_grade(conversation, rewrites_left).await?,
                AgentState::Rewrite {
                    conversation,
                    rewrites_left,
                } => self.handle_rewrite(conversation, rewrites_left).await?,
                AgentState::Generate { conversation } => {
                    self.handle_generate(conversation).await?
                }
                AgentState::Complete {
                    conversation,
                    answer,
                } => {
                    let citations = extract_if_retrieved(&conversation.messages);
                    info!(
                        run = %conversation.id,
                        messages = conversation.message_count(),
                        citations = citations.len(),
                        "control loop complete"
                    );
                    return Ok(RunOutcome {
                        answer,
                        citations,
                        conversation,
                    });
                }
            };
        }
    }

    /// Decide: answer directly or request the retriever tool.
    async fn handle_decide(
        &self,
        mut conversation: Conversation,
        rewrites_left: u32,
    ) -> Result<AgentState> {
        let tools = [tool_definition()];
        let decision = self.llm.decide(&conversation.messages, &tools).await?;

        match decision {
            Decision::Answer(text) => {
                debug!("model answered directly, no retrieval");
                conversation.push(Message::assistant(text.clone()));
                Ok(AgentState::Complete {
                    conversation,
                    answer: text,
                })
            }
            Decision::ToolCall {
                id,
                name,
                arguments,
            } => {
                if name != RETRIEVER_TOOL_NAME {
                    return Err(Error::Llm(format!(
                        "Model requested unknown tool: {}",
                        name
                    )));
                }

                // Fall back to the latest user turn when the model omits
                // the query argument.
                let query = match arguments.get("query").and_then(|v| v.as_str()) {
                    Some(q) => q.to_string(),
                    None => {
                        warn!("tool call missing 'query' argument, using latest question");
                        conversation.latest_question().to_string()
                    }
                };

                conversation.push(Message::assistant_tool_call(id.as_str(), name.as_str(), &arguments));
                Ok(AgentState::Retrieve {
                    conversation,
                    call: RetrieverCall { id, query },
                    rewrites_left,
                })
            }
        }
    }

    /// Retrieve: run the tool call and append its structured output.
    async fn handle_retrieve(
        &self,
        mut conversation: Conversation,
        call: RetrieverCall,
        rewrites_left: u32,
    ) -> Result<AgentState> {
        let passages = self.retriever.search(&call.query, self.config.top_k).await?;
        debug!(
            query = %call.query,
            passages = passages.len(),
            "retrieval complete"
        );

        let blocks = render_citation_blocks(&passages);
        conversation.push(Message::tool(call.id, blocks));
        Ok(AgentState::Grade {
            conversation,
            rewrites_left,
        })
    }

    /// Grade: relevance gate over the latest retrieval output.
    async fn handle_grade(
        &self,
        conversation: Conversation,
        rewrites_left: u32,
    ) -> Result<AgentState> {
        let context = conversation.latest_tool_content().unwrap_or_default();
        let prompt = self.prompts.grade(conversation.question(), context)?;

        // Advisory output: a failed or malformed grading defaults to "not
        // relevant" rather than aborting the run.
        let relevant = match self.llm.complete(&prompt).await {
            Ok(score) => score.trim().eq_ignore_ascii_case("yes"),
            Err(e) => {
                warn!("grader failed, treating context as not relevant: {}", e);
                false
            }
        };

        if relevant {
            Ok(AgentState::Generate { conversation })
        } else if rewrites_left == 0 {
            warn!("rewrite budget exhausted, forcing answer generation");
            Ok(AgentState::Generate { conversation })
        } else {
            Ok(AgentState::Rewrite {
                conversation,
                rewrites_left,
            })
        }
    }

    /// Rewrite: reformulate the original question and loop back to Decide.
    async fn handle_rewrite(
        &self,
        mut conversation: Conversation,
        rewrites_left: u32,
    ) -> Result<AgentState> {
        let prompt = self.prompts.rewrite(conversation.question())?;
        let rewritten = self.llm.complete(&prompt).await?;
        debug!(rewritten = %rewritten, "question rewritten");

        conversation.push(Message::user(rewritten));
        Ok(AgentState::Decide {
            conversation,
            rewrites_left: rewrites_left - 1,
        })
    }

    /// Generate: final answer constrained to the retrieved context.
    async fn handle_generate(&self, mut conversation: Conversation) -> Result<AgentState> {
        let context = conversation.latest_tool_content().unwrap_or_default();
        let prompt = self.prompts.generate(conversation.question(), context)?;
        let answer = self.llm.complete(&prompt).await?;

        conversation.push(Message::assistant(answer.clone()));
        Ok(AgentState::Complete {
            conversation,
            answer,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::types::Role;
    use crate::retrieval::Passage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted model: pops queued decisions; completions are answered by
    /// sniffing which prompt template asked.
    pub(crate) struct ScriptedLlm {
        decisions: Mutex<VecDeque<Decision>>,
        grade_reply: String,
        rewrite_reply: String,
        generate_reply: String,
        pub grade_calls: AtomicUsize,
        pub rewrite_calls: AtomicUsize,
        pub generate_calls: AtomicUsize,
    }

    impl ScriptedLlm {
        pub fn new(
            decisions: Vec<Decision>,
            grade_reply: &str,
            rewrite_reply: &str,
            generate_reply: &str,
        ) -> Self {
            ScriptedLlm {
                decisions: Mutex::new(decisions.into()),
                grade_reply: grade_reply.to_string(),
                rewrite_reply: rewrite_reply.to_string(),
                generate_reply: generate_reply.to_string(),
                grade_calls: AtomicUsize::new(0),
                rewrite_calls: AtomicUsize::new(0),
                generate_calls: AtomicUsize::new(0),
            }
        }

        pub fn tool_call(query: &str) -> Decision {
            Decision::ToolCall {
                id: "call-1".to_string(),
                name: RETRIEVER_TOOL_NAME.to_string(),
                arguments: serde_json::json!({ "query": query }),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn decide(
            &self,
            _messages: &[Message],
            _tools: &[crate::agent::types::ToolDefinition],
        ) -> Result<Decision> {
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Llm("scripted decisions exhausted".into()))
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("grader assessing relevance") {
                self.grade_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.grade_reply.clone())
            } else if prompt.contains("infer the user's intent") {
                self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.rewrite_reply.clone())
            } else {
                self.generate_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.generate_reply.clone())
            }
        }
    }

    /// Fixed-result retriever.
    pub(crate) struct FixedRetriever {
        pub passages: Vec<Passage>,
        pub calls: AtomicUsize,
    }

    impl FixedRetriever {
        pub fn new(passages: Vec<Passage>) -> Self {
            FixedRetriever {
                passages,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn policy_passage() -> Passage {
            Passage {
                source: "policy.pdf".to_string(),
                title: Some("Refund Policy".to_string()),
                page: Some(3),
                chunk_id: Some("7".to_string()),
                text: "Refunds are accepted within 14 days of purchase.".to_string(),
            }
        }
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.passages.iter().take(k).cloned().collect())
        }
    }

    fn agent_config(max_rewrites: u32) -> AgentConfig {
        AgentConfig {
            max_rewrites,
            top_k: 4,
        }
    }

    #[tokio::test]
    async fn test_direct_answer_skips_retrieval() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Decision::Answer("Hello!".to_string())],
            "yes",
            "",
            "",
        ));
        let retriever = Arc::new(FixedRetriever::new(vec![]));
        let agent = RagAgent::new(llm, retriever.clone(), agent_config(3)).unwrap();

        let outcome = agent.run("hi").await.unwrap();

        assert_eq!(outcome.answer, "Hello!");
        assert!(outcome.citations.is_empty());
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.conversation.message_count(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_grade_generate_path() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![ScriptedLlm::tool_call("refund window")],
            "yes",
            "",
            "Refunds are accepted within 14 days.",
        ));
        let retriever = Arc::new(FixedRetriever::new(vec![FixedRetriever::policy_passage()]));
        let agent = RagAgent::new(llm.clone(), retriever, agent_config(3)).unwrap();

        let outcome = agent.run("What is the refund window?").await.unwrap();

        assert_eq!(outcome.answer, "Refunds are accepted within 14 days.");
        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.citations[0].source, "policy.pdf");
        assert_eq!(outcome.citations[0].page, Some(3));
        assert_eq!(llm.rewrite_calls.load(Ordering::SeqCst), 0);

        // user, assistant tool call, tool output, assistant answer
        let roles: Vec<Role> = outcome
            .conversation
            .messages
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_hostile_grader_terminates_within_budget() {
        let max_rewrites = 3;
        let llm = Arc::new(ScriptedLlm::new(
            // One decide per attempt: the original plus one per rewrite.
            (0..=max_rewrites)
                .map(|_| ScriptedLlm::tool_call("q"))
                .collect(),
            "no",
            "rewritten question",
            "Best effort answer from the last context.",
        ));
        let retriever = Arc::new(FixedRetriever::new(vec![FixedRetriever::policy_passage()]));
        let agent = RagAgent::new(llm.clone(), retriever, agent_config(max_rewrites)).unwrap();

        let outcome = agent.run("unanswerable?").await.unwrap();

        assert!(!outcome.answer.is_empty());
        assert_eq!(
            llm.rewrite_calls.load(Ordering::SeqCst),
            max_rewrites as usize
        );
        assert_eq!(
            llm.grade_calls.load(Ordering::SeqCst),
            max_rewrites as usize + 1
        );
        assert_eq!(llm.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_grading_fails_toward_rewrite() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![
                ScriptedLlm::tool_call("q"),
                ScriptedLlm::tool_call("q again"),
            ],
            "certainly relevant!", // not an exact "yes"
            "rewritten",
            "answer",
        ));
        let retriever = Arc::new(FixedRetriever::new(vec![FixedRetriever::policy_passage()]));
        let agent = RagAgent::new(llm.clone(), retriever, agent_config(1)).unwrap();

        let outcome = agent.run("q?").await.unwrap();

        // Grader never said exactly "yes", so one rewrite happened before
        // the budget forced generation.
        assert_eq!(llm.rewrite_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.answer, "answer");
    }

    #[tokio::test]
    async fn test_missing_query_argument_falls_back_to_question() {
        struct CapturingRetriever(Mutex<Vec<String>>);

        #[async_trait]
        impl Retriever for CapturingRetriever {
            async fn search(&self, query: &str, _k: usize) -> Result<Vec<Passage>> {
                self.0.lock().unwrap().push(query.to_string());
                Ok(vec![FixedRetriever::policy_passage()])
            }
        }

        let llm = Arc::new(ScriptedLlm::new(
            vec![Decision::ToolCall {
                id: "call-1".to_string(),
                name: RETRIEVER_TOOL_NAME.to_string(),
                arguments: serde_json::json!({}),
            }],
            "yes",
            "",
            "answer",
        ));
        let retriever = Arc::new(CapturingRetriever(Mutex::new(Vec::new())));
        let agent = RagAgent::new(llm, retriever.clone(), agent_config(3)).unwrap();

        agent.run("What is the refund window?").await.unwrap();

        let queries = retriever.0.lock().unwrap();
        assert_eq!(queries.as_slice(), ["What is the refund window?"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let llm = Arc::new(ScriptedLlm::new(
            vec![Decision::ToolCall {
                id: "call-1".to_string(),
                name: "delete_everything".to_string(),
                arguments: serde_json::json!({}),
            }],
            "yes",
            "",
            "",
        ));
        let retriever = Arc::new(FixedRetriever::new(vec![]));
        let agent = RagAgent::new(llm, retriever, agent_config(3)).unwrap();

        assert!(matches!(agent.run("q").await, Err(Error::Llm(_))));
    }
}
