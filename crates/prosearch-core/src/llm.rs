//! Language-model collaborator: trait seam, retry policy, and an
//! OpenAI-compatible client for OpenRouter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{ResearchError, TaskError};
use crate::security::SecretValue;

/// Creative sampling used while generating queries and reflecting.
pub const CREATIVE_TEMPERATURE: f32 = 1.0;
/// Deterministic sampling used for the final answer.
pub const DETERMINISTIC_TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    /// Ask the provider for a JSON object instead of free text.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature,
            json_output: false,
        }
    }

    pub fn structured(
        model: impl Into<String>,
        prompt: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            json_output: true,
            ..Self::text(model, prompt, temperature)
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TaskError>;
}

/// Bounded retry with exponential backoff for transient model failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Retry without sleeping between attempts.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

/// Invoke `model` and hand the raw reply to `parse`, retrying retryable
/// failures of either stage up to `policy.max_retries` times.
async fn invoke_with_retry<T, F>(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    parse: F,
) -> Result<T, ResearchError>
where
    F: Fn(&str) -> Result<T, TaskError>,
{
    let mut attempt = 0;
    let mut backoff_ms = policy.initial_backoff_ms;

    loop {
        let result = model
            .complete(request)
            .await
            .and_then(|reply| parse(&reply));

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    model = %request.model,
                    error = %err,
                    attempt,
                    backoff_ms,
                    "model call failed, retrying"
                );
                if backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                backoff_ms = (backoff_ms * 2).min(policy.max_backoff_ms);
            }
            Err(err) => {
                tracing::error!(model = %request.model, error = %err, "model call failed permanently");
                return Err(ResearchError::Model(err));
            }
        }
    }
}

/// Free-form text completion.
pub async fn generate_text(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<String, ResearchError> {
    invoke_with_retry(model, request, policy, |reply| Ok(reply.to_string())).await
}

/// Completion parsed into the declared output shape `T`.
pub async fn generate_structured<T>(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<T, ResearchError>
where
    T: DeserializeOwned,
{
    invoke_with_retry(model, request, policy, parse_structured::<T>).await
}

/// Parse a JSON reply, tolerating a surrounding Markdown code fence.
pub fn parse_structured<T: DeserializeOwned>(reply: &str) -> Result<T, TaskError> {
    let body = strip_code_fence(reply);
    serde_json::from_str(body)
        .map_err(|err| TaskError::transient(format!("malformed structured output: {err}")))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenRouter (or any OpenAI-compatible endpoint).
pub struct OpenRouterModel {
    http: Client,
    base_url: String,
    api_key: SecretValue,
}

impl OpenRouterModel {
    pub fn new(config: &LlmConfig, api_key: SecretValue) -> Result<Self, ResearchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| {
                ResearchError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TaskError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            response_format: request
                .json_output
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| TaskError::transient(format!("request to model provider failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(TaskError::new(
                format!("model provider returned {status}: {detail}"),
                retryable,
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| TaskError::transient(format!("invalid model response body: {err}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TaskError::transient("model response contained no content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Reflection;
    use std::sync::Mutex;

    struct FlakyModel {
        replies: Mutex<Vec<Result<String, TaskError>>>,
        calls: Mutex<usize>,
    }

    impl FlakyModel {
        fn new(mut replies: Vec<Result<String, TaskError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LanguageModel for FlakyModel {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, TaskError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TaskError::terminal("script exhausted")))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::structured("test-model", "prompt", CREATIVE_TEMPERATURE)
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let model = FlakyModel::new(vec![
            Err(TaskError::transient("rate limited")),
            Ok(r#"{"is_sufficient": true, "knowledge_gap": "", "follow_up_queries": []}"#.into()),
        ]);

        let reflection: Reflection =
            generate_structured(&model, &request(), &RetryPolicy::immediate(2))
                .await
                .expect("second attempt should succeed");

        assert!(reflection.is_sufficient);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_output_exhausts_retries() {
        let model = FlakyModel::new(vec![
            Ok("not json".into()),
            Ok("still not json".into()),
            Ok("{}".into()),
        ]);

        let err = generate_structured::<Reflection>(&model, &request(), &RetryPolicy::immediate(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Model(ref task) if task.retryable));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_failures_are_not_retried() {
        let model = FlakyModel::new(vec![Err(TaskError::terminal("401 unauthorized"))]);

        let err = generate_text(&model, &request(), &RetryPolicy::immediate(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ResearchError::Model(_)));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn code_fences_are_stripped() {
        let reply = "```json\n{\"is_sufficient\": false, \"knowledge_gap\": \"gap\", \"follow_up_queries\": [\"q\"]}\n```";
        let reflection: Reflection = parse_structured(reply).unwrap();
        assert_eq!(reflection.follow_up_queries, vec!["q".to_string()]);
    }

    #[test]
    fn json_output_flag_sets_response_format() {
        let body = ChatRequest {
            model: "m",
            messages: vec![],
            temperature: 0.0,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
    }
}
