//! Request/response/error types shared by the gateway handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use press_store::{SourceData, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Error payload mapped to the pipeline's HTTP response envelope.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ApiError::not_found(format!("entry '{id}' not found")),
            StoreError::InvalidTransition { from, to } => ApiError::new(
                StatusCode::CONFLICT,
                "invalid_state",
                format!(
                    "transition {} -> {} is not allowed",
                    from.as_str(),
                    to.as_str()
                ),
            ),
            StoreError::ConcurrentModification(id) => ApiError::new(
                StatusCode::CONFLICT,
                "concurrent_modification",
                format!("entry '{id}' changed concurrently; retry with fresh state"),
            ),
            StoreError::EmptyTitle => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "empty_title",
                "approval requires a non-empty customer-facing title",
            ),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Envelope returned for every handled webhook delivery.
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "changelogCreated")]
    pub changelog_created: bool,
}

#[derive(Debug, Deserialize)]
/// Body of the approval endpoint.
pub(crate) struct ApprovalRequest {
    pub(crate) approval_status: String,
    #[serde(default)]
    pub(crate) customer_facing_title: Option<String>,
    #[serde(default)]
    pub(crate) public_visibility: Option<bool>,
    #[serde(default)]
    pub(crate) source_data: Option<SourceData>,
}

#[derive(Debug, Deserialize)]
/// Body of the regeneration endpoint.
pub(crate) struct RegenerateRequest {
    #[serde(default, rename = "relatedStories")]
    pub(crate) related_stories: Vec<String>,
}

#[derive(Debug, Serialize)]
/// Response of the regeneration endpoint, including partial-failure detail.
pub(crate) struct RegenerateResponse {
    pub(crate) success: bool,
    #[serde(rename = "relatedStoriesRequested")]
    pub(crate) related_stories_requested: usize,
    #[serde(rename = "relatedStoriesProcessed")]
    pub(crate) related_stories_processed: usize,
    #[serde(rename = "failedStories")]
    pub(crate) failed_stories: Vec<String>,
    #[serde(rename = "enhancedContent")]
    pub(crate) enhanced_content: Option<serde_json::Value>,
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
/// Body of the template upsert endpoint.
pub(crate) struct TemplateUpsertRequest {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) channel: Option<String>,
    pub(crate) template: String,
    #[serde(default = "default_true")]
    pub(crate) enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
/// Body of the template test-render endpoint.
pub(crate) struct TemplateTestRequest {
    pub(crate) template: String,
    #[serde(default)]
    pub(crate) sample: Option<TemplateSample>,
}

#[derive(Debug, Default, Deserialize)]
/// Sample values for a test render; fields mirror the render tokens.
pub(crate) struct TemplateSample {
    #[serde(default, rename = "contentTitle")]
    pub(crate) content_title: Option<String>,
    #[serde(default, rename = "contentType")]
    pub(crate) content_type: Option<String>,
    #[serde(default, rename = "qualityScore")]
    pub(crate) quality_score: Option<f64>,
    #[serde(default, rename = "contentUrl")]
    pub(crate) content_url: Option<String>,
    #[serde(default, rename = "createdDate")]
    pub(crate) created_date: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TemplateTestResponse {
    pub(crate) rendered: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) status: &'static str,
    pub(crate) entries: u64,
}
