//! Language model client (OpenRouter-compatible chat-completions API)

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::agent::types::*;
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// The model-facing seam of the control loop.
///
/// `decide` lets the model either answer or request a retrieval tool call;
/// `complete` runs the single-prompt steps (grading, rewriting, generation).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Answer directly or elect to invoke one of the offered tools
    async fn decide(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Decision>;

    /// Single-prompt completion
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenRouter API client
#[derive(Clone)]
pub struct OpenRouterClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
}

impl OpenRouterClient {
    /// Create a new client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!(
                "Bearer {}",
                config.api_key.expose_secret()
            ))
            .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(OpenRouterClient { client, config })
    }

    /// Create a chat completion, optionally offering tools
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ChatCompletionResponse> {
        let tool_choice = tools
            .as_ref()
            .map(|_| ToolChoice::Auto("auto".to_string()));
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: Some(self.config.temperature),
            tools,
            tool_choice,
        };

        // Transient failures (transport, rate limit) retry with exponential
        // backoff inside the configured budget; everything else is permanent.
        let policy = ExponentialBackoffBuilder::default()
            .with_max_elapsed_time(Some(std::time::Duration::from_secs(
                self.config.retry_budget_secs,
            )))
            .build();

        backoff::future::retry(policy, || async {
            self.send_request(&request).await.map_err(|e| {
                if e.is_retryable() {
                    warn!("LLM request failed, will retry: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    /// Send one request to the chat-completions endpoint
    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!("Sending request to LLM API: model={}", request.model);

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();

        if status.is_success() {
            let body = response.json::<ChatCompletionResponse>().await?;

            if let Some(ref usage) = body.usage {
                info!(
                    "LLM response: model={}, prompt_tokens={}, completion_tokens={}, total_tokens={}",
                    body.model, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
            }

            Ok(body)
        } else {
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                warn!("Rate limit exceeded: {}", error_text);
                Err(Error::RateLimit(error_text))
            } else if status.as_u16() == 401 {
                Err(Error::Unauthorized("Invalid API key".to_string()))
            } else {
                Err(Error::Llm(format!("API error ({}): {}", status, error_text)))
            }
        }
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn decide(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<Decision> {
        let response = self.chat(messages.to_vec(), Some(tools.to_vec())).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("Empty completion response".into()))?;

        debug!(
            "decide step finished: finish_reason={}",
            choice.finish_reason.as_deref().unwrap_or("unknown")
        );

        if let Some(tool_call) = choice
            .message
            .tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
        {
            let arguments = serde_json::from_str(&tool_call.function.arguments)
                .unwrap_or_else(|e| {
                    warn!(
                        "Failed to parse tool arguments for {}: {}",
                        tool_call.function.name, e
                    );
                    serde_json::json!({})
                });

            return Ok(Decision::ToolCall {
                id: tool_call.id.clone(),
                name: tool_call.function.name.clone(),
                arguments,
            });
        }

        Ok(Decision::Answer(choice.message.content))
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.chat(vec![Message::user(prompt)], None).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Llm("Empty completion response".into()))
    }
}
