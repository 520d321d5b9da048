//! Tracker REST client used for related-story lookup and approval sync-back.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::TrackerError;

/// Minimal issue view fetched for regeneration context.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueSnapshot {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status_name: Option<String>,
}

#[async_trait]
/// Trait contract for `TrackerClient` behavior.
pub trait TrackerClient: Send + Sync {
    /// Fetches one issue by key; `Ok(None)` when the tracker has no such issue.
    async fn fetch_issue(&self, key: &str) -> Result<Option<IssueSnapshot>, TrackerError>;

    /// Writes the approved customer-facing summary into a custom field.
    ///
    /// Idempotent: re-writing the same value is a harmless overwrite.
    async fn write_summary_field(
        &self,
        key: &str,
        field_id: &str,
        text: &str,
    ) -> Result<(), TrackerError>;
}

#[derive(Debug, Clone)]
/// Public struct `HttpTrackerConfig` used across Pressline components.
pub struct HttpTrackerConfig {
    pub api_base: String,
    pub api_token: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone)]
/// REST-backed `TrackerClient` speaking the tracker's issue API.
pub struct HttpTrackerClient {
    http: reqwest::Client,
    api_base: String,
}

impl HttpTrackerClient {
    pub fn new(config: HttpTrackerConfig) -> Result<Self, TrackerError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if !config.api_token.trim().is_empty() {
            let bearer = format!("Bearer {}", config.api_token.trim());
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&bearer) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn issue_url(&self, key: &str) -> String {
        format!("{}/rest/api/2/issue/{}", self.api_base, key.trim())
    }
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    key: String,
    #[serde(default)]
    fields: IssueResponseFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueResponseFields {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<IssueResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct IssueResponseStatus {
    #[serde(default)]
    name: Option<String>,
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn fetch_issue(&self, key: &str) -> Result<Option<IssueSnapshot>, TrackerError> {
        let url = format!("{}?fields=summary,description,status", self.issue_url(key));
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: IssueResponse = response.json().await?;
        debug!(issue_key = %parsed.key, "fetched tracker issue");
        Ok(Some(IssueSnapshot {
            key: parsed.key,
            summary: parsed.fields.summary.unwrap_or_default(),
            description: parsed.fields.description.unwrap_or_default(),
            status_name: parsed.fields.status.and_then(|status| status.name),
        }))
    }

    async fn write_summary_field(
        &self,
        key: &str,
        field_id: &str,
        text: &str,
    ) -> Result<(), TrackerError> {
        let body = json!({ "fields": { field_id: text } });
        let response = self.http.put(self.issue_url(key)).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        debug!(issue_key = %key, field_id = %field_id, "wrote summary field");
        Ok(())
    }
}
