use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{
        is_retryable_http_error, new_request_id, parse_retry_after_ms, provider_retry_delay_ms,
        retry_budget_allows_delay, should_retry_status,
    },
    CompletionRequest, CompletionResponse, CompletionUsage, LlmClient, MessageRole, PressAiError,
};

#[derive(Debug, Clone)]
/// Public struct `OpenAiConfig` used across Pressline components.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
}

#[derive(Debug, Clone)]
/// Public struct `OpenAiClient` used across Pressline components.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, PressAiError> {
        if config.api_key.trim().is_empty() {
            return Err(PressAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                PressAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, PressAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        let started = std::time::Instant::now();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let request_id = new_request_id();
            let response = self
                .client
                .post(&url)
                .header("x-press-request-id", request_id)
                .header("x-press-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = provider_retry_delay_ms(attempt, retry_after_ms);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if retry_budget_allows_delay(
                            elapsed_ms,
                            backoff_ms,
                            self.config.retry_budget_ms,
                        ) {
                            sleep(std::time::Duration::from_millis(backoff_ms)).await;
                            continue;
                        }
                    }

                    return Err(PressAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms = provider_retry_delay_ms(attempt, None);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if retry_budget_allows_delay(
                            elapsed_ms,
                            backoff_ms,
                            self.config.retry_budget_ms,
                        ) {
                            sleep(std::time::Duration::from_millis(backoff_ms)).await;
                            continue;
                        }
                    }
                    return Err(PressAiError::Http(error));
                }
            }
        }

        Err(PressAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &CompletionRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            json!({ "role": role, "content": message.content })
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsagePayload>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_chat_response(raw: &str) -> Result<CompletionResponse, PressAiError> {
    let parsed: ChatCompletionsResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| PressAiError::InvalidResponse("response contained no choices".to_string()))?;
    let usage = parsed
        .usage
        .map(|usage| CompletionUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::{build_chat_request_body, parse_chat_response, OpenAiClient, OpenAiConfig};
    use crate::{CompletionRequest, LlmClient, Message, PressAiError};
    use httpmock::prelude::*;

    fn sample_request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![
                Message::system("You write changelog copy."),
                Message::user("Summarize PRESS-100."),
            ],
            max_tokens: Some(512),
            temperature: Some(0.2),
        }
    }

    #[test]
    fn unit_new_rejects_empty_api_key() {
        let result = OpenAiClient::new(OpenAiConfig {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: "   ".to_string(),
            request_timeout_ms: 1_000,
            max_retries: 0,
            retry_budget_ms: 0,
        });
        assert!(matches!(result, Err(PressAiError::MissingApiKey)));
    }

    #[test]
    fn unit_build_chat_request_body_maps_roles_and_limits() {
        let body = build_chat_request_body(&sample_request("gpt-4o-mini"));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn unit_parse_chat_response_extracts_text_and_usage() {
        let raw = serde_json::json!({
            "choices": [{
                "message": { "content": "New export flow" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        })
        .to_string();
        let response = parse_chat_response(&raw).expect("parse");
        assert_eq!(response.text, "New export flow");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn regression_parse_chat_response_rejects_empty_choices() {
        let raw = serde_json::json!({ "choices": [] }).to_string();
        assert!(matches!(
            parse_chat_response(&raw),
            Err(PressAiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn integration_complete_retries_retryable_status_then_succeeds() {
        let server = MockServer::start_async().await;
        let failure = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("x-press-retry-attempt", "0");
                then.status(503).body("overloaded");
            })
            .await;
        let success = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("x-press-retry-attempt", "1");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{ "message": { "content": "draft" }, "finish_reason": "stop" }]
                }));
            })
            .await;

        let client = OpenAiClient::new(OpenAiConfig {
            api_base: format!("{}/v1", server.base_url()),
            api_key: "test-key".to_string(),
            request_timeout_ms: 5_000,
            max_retries: 1,
            retry_budget_ms: 0,
        })
        .expect("client");

        let response = client.complete(sample_request("gpt-4o-mini")).await.expect("complete");
        assert_eq!(response.text, "draft");
        failure.assert_async().await;
        success.assert_async().await;
    }

    #[tokio::test]
    async fn integration_complete_surfaces_non_retryable_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(400).body("bad request");
            })
            .await;

        let client = OpenAiClient::new(OpenAiConfig {
            api_base: format!("{}/v1", server.base_url()),
            api_key: "test-key".to_string(),
            request_timeout_ms: 5_000,
            max_retries: 2,
            retry_budget_ms: 0,
        })
        .expect("client");

        let error = client
            .complete(sample_request("gpt-4o-mini"))
            .await
            .expect_err("must fail");
        assert!(matches!(error, PressAiError::HttpStatus { status: 400, .. }));
    }
}
