//! Best-effort chat webhook delivery with bounded retries.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Delivery result for one notification attempt chain.
pub enum NotificationOutcome {
    Delivered,
    Failed,
}

/// Ephemeral record of one rendered notification; used for logging only,
/// never for state transitions.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    pub channel: String,
    pub text: String,
    pub outcome: NotificationOutcome,
}

#[derive(Debug, Clone)]
/// Public struct `ChatNotifierConfig` used across Pressline components.
pub struct ChatNotifierConfig {
    pub webhook_url: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

/// Posts rendered review prompts to a chat incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct ChatNotifier {
    http: reqwest::Client,
    webhook_url: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl ChatNotifier {
    pub fn new(config: ChatNotifierConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create chat notifier client")?;
        Ok(Self {
            http,
            webhook_url: config.webhook_url.trim().to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    /// True when a webhook URL is configured; an empty URL disables delivery.
    pub fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    /// Sends one message. Transient statuses (429/5xx) and transport errors
    /// are retried with exponential backoff; the final failure is reported
    /// as an outcome, never an error, so callers cannot accidentally couple
    /// pipeline state to delivery.
    pub async fn send(&self, channel: &str, text: &str) -> NotificationRecord {
        if !self.is_configured() {
            warn!(channel = %channel, "chat webhook not configured; dropping notification");
            return NotificationRecord {
                channel: channel.to_string(),
                text: text.to_string(),
                outcome: NotificationOutcome::Failed,
            };
        }

        let body = json!({ "channel": channel, "text": text });
        for attempt in 0..self.retry_max_attempts {
            let response = self.http.post(&self.webhook_url).json(&body).send().await;
            match response {
                Ok(response) if response.status().is_success() => {
                    return NotificationRecord {
                        channel: channel.to_string(),
                        text: text.to_string(),
                        outcome: NotificationOutcome::Delivered,
                    };
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retryable = status == 429 || status >= 500;
                    warn!(channel = %channel, status, attempt, "chat delivery rejected");
                    if !retryable || attempt + 1 == self.retry_max_attempts {
                        break;
                    }
                }
                Err(error) => {
                    warn!(channel = %channel, %error, attempt, "chat delivery failed");
                    if attempt + 1 == self.retry_max_attempts {
                        break;
                    }
                }
            }
            let delay_ms = self.retry_base_delay_ms.saturating_mul(1 << attempt.min(6));
            sleep(Duration::from_millis(delay_ms)).await;
        }

        NotificationRecord {
            channel: channel.to_string(),
            text: text.to_string(),
            outcome: NotificationOutcome::Failed,
        }
    }
}
