//! LLM provider clients used by the changelog draft generator.
mod anthropic;
mod openai;
mod retry;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use retry::{
    is_retryable_http_error, new_request_id, next_backoff_ms, parse_retry_after_ms,
    provider_retry_delay_ms, retry_budget_allows_delay, should_retry_status,
};
pub use types::{
    CompletionRequest, CompletionResponse, CompletionUsage, LlmClient, Message, MessageRole,
    PressAiError,
};
