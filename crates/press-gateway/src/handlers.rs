//! HTTP handlers for the Pressline gateway endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use press_notify::{render_template, MessageTemplate, TemplateContext, DEFAULT_TEMPLATE_NAME};
use press_store::{ApprovalStatus, ApprovalUpdate, ChangelogEntry, ContentUpdate, EntryFilter};
use serde::Deserialize;
use tracing::info;

use crate::pipeline::{self, WebhookError};
use crate::state::GatewayState;
use crate::types::{
    ApiError, ApprovalRequest, RegenerateRequest, RegenerateResponse, StatusResponse,
    TemplateTestRequest, TemplateTestResponse, TemplateUpsertRequest, WebhookResponse,
};

pub(crate) async fn receive_webhook(
    State(state): State<Arc<GatewayState>>,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    match pipeline::process_webhook(&state, &body).await {
        Ok(response) => Ok(Json(response)),
        Err(WebhookError::Invalid(message)) => {
            Err(ApiError::bad_request("invalid_payload", message))
        }
        Err(WebhookError::Store(error)) => Err(error.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EntryListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    issue_key: Option<String>,
}

pub(crate) async fn list_entries(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<EntryListQuery>,
) -> Result<Json<Vec<ChangelogEntry>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(ApprovalStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_request(
                "invalid_status",
                format!("unknown approval status '{raw}'"),
            )
        })?),
        None => None,
    };
    let entries = state
        .store
        .list_entries(EntryFilter {
            status,
            issue_key: query.issue_key,
        })
        .await?;
    Ok(Json(entries))
}

pub(crate) async fn get_entry(
    State(state): State<Arc<GatewayState>>,
    Path(entry_id): Path<String>,
) -> Result<Json<ChangelogEntry>, ApiError> {
    let entry = state
        .store
        .get_entry(&entry_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("entry '{entry_id}' not found")))?;
    Ok(Json(entry))
}

pub(crate) async fn update_approval(
    State(state): State<Arc<GatewayState>>,
    Path(entry_id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<ChangelogEntry>, ApiError> {
    let entry = state
        .store
        .get_entry(&entry_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("entry '{entry_id}' not found")))?;

    match request.approval_status.as_str() {
        "approved" => {
            let approved = state
                .store
                .approve(
                    &entry_id,
                    entry.revision,
                    ApprovalUpdate {
                        customer_facing_title: request.customer_facing_title,
                        public_visibility: request.public_visibility,
                        source_data: request.source_data,
                    },
                )
                .await?;
            info!(entry_id = %approved.id, issue_key = %approved.issue_key, "entry approved");
            pipeline::sync_back_approved(&state, &approved).await;
            // Sync-back may have flipped the pending flag; report fresh state.
            let latest = state
                .store
                .get_entry(&entry_id)
                .await?
                .unwrap_or(approved);
            Ok(Json(latest))
        }
        "rejected" => {
            let rejected = state.store.reject(&entry_id, entry.revision).await?;
            info!(entry_id = %rejected.id, issue_key = %rejected.issue_key, "entry rejected");
            Ok(Json(rejected))
        }
        other => Err(ApiError::bad_request(
            "invalid_approval_status",
            format!("approval_status must be 'approved' or 'rejected', got '{other}'"),
        )),
    }
}

pub(crate) async fn regenerate_entry(
    State(state): State<Arc<GatewayState>>,
    Path(entry_id): Path<String>,
    Json(request): Json<RegenerateRequest>,
) -> Result<Json<RegenerateResponse>, ApiError> {
    let entry = state
        .store
        .get_entry(&entry_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("entry '{entry_id}' not found")))?;
    // Checked again by the revision-guarded update; this just avoids spending
    // provider budget on an entry that can no longer accept content.
    if entry.approval_status != ApprovalStatus::PendingReview {
        return Err(ApiError::new(
            axum::http::StatusCode::CONFLICT,
            "invalid_state",
            format!(
                "entry is {}; only pending_review entries can be regenerated",
                entry.approval_status.as_str()
            ),
        ));
    }

    let outcome = match state
        .generator
        .regenerate(
            &entry.issue_key,
            &entry.customer_title,
            &entry.customer_description,
            &request.related_stories,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => {
            info!(entry_id = %entry.id, %error, "regeneration failed; existing content kept");
            return Ok(Json(RegenerateResponse {
                success: false,
                related_stories_requested: request.related_stories.len(),
                related_stories_processed: 0,
                failed_stories: request.related_stories,
                enhanced_content: None,
                message: "all providers failed; existing content was kept".to_string(),
            }));
        }
    };

    let updated = state
        .store
        .update_content(
            &entry_id,
            entry.revision,
            ContentUpdate {
                customer_title: outcome.draft.customer_title.clone(),
                customer_description: outcome.draft.customer_description.clone(),
                highlights: outcome.draft.highlights.clone(),
                category: outcome.draft.category.clone(),
                quality_score: outcome.quality_score,
                breaking_changes: outcome.draft.breaking_changes,
                migration_notes: outcome.draft.migration_notes.clone(),
                provider: outcome.provider.clone(),
            },
        )
        .await?;

    let enhanced_content = serde_json::to_value(&updated)
        .map_err(|error| ApiError::internal(error.to_string()))?;
    let message = if outcome.failed_stories.is_empty() {
        "entry regenerated".to_string()
    } else {
        format!(
            "entry regenerated; {} related stories could not be resolved",
            outcome.failed_stories.len()
        )
    };
    Ok(Json(RegenerateResponse {
        success: true,
        related_stories_requested: outcome.related_requested,
        related_stories_processed: outcome.related_processed,
        failed_stories: outcome.failed_stories,
        enhanced_content: Some(enhanced_content),
        message,
    }))
}

pub(crate) async fn publish_entry(
    State(state): State<Arc<GatewayState>>,
    Path(entry_id): Path<String>,
) -> Result<Json<ChangelogEntry>, ApiError> {
    let entry = state
        .store
        .get_entry(&entry_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("entry '{entry_id}' not found")))?;
    let published = state.store.publish(&entry_id, entry.revision).await?;
    info!(entry_id = %published.id, "entry published to the public changelog");
    Ok(Json(published))
}

pub(crate) async fn list_templates(
    State(state): State<Arc<GatewayState>>,
) -> Json<Vec<MessageTemplate>> {
    Json(state.templates.list())
}

pub(crate) async fn upsert_template(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<TemplateUpsertRequest>,
) -> Result<Json<MessageTemplate>, ApiError> {
    let channel = match request.channel {
        Some(channel) => channel,
        None => state
            .templates
            .get(DEFAULT_TEMPLATE_NAME)
            .map(|template| template.channel)
            .unwrap_or_default(),
    };
    let saved = state
        .templates
        .upsert(MessageTemplate {
            name: request.name,
            channel,
            template: request.template,
            enabled: request.enabled,
            updated_unix_ms: 0,
        })
        .map_err(|error| ApiError::bad_request("invalid_template", error.to_string()))?;
    Ok(Json(saved))
}

pub(crate) async fn test_template(
    Json(request): Json<TemplateTestRequest>,
) -> Json<TemplateTestResponse> {
    let sample = request.sample.unwrap_or_default();
    let context = TemplateContext {
        content_title: sample
            .content_title
            .unwrap_or_else(|| "Sample changelog title".to_string()),
        content_type: sample.content_type.unwrap_or_else(|| "feature".to_string()),
        quality_score: sample.quality_score.unwrap_or(0.85),
        content_url: sample
            .content_url
            .unwrap_or_else(|| "https://example.invalid/entries/entry-1".to_string()),
        created_date: sample
            .created_date
            .unwrap_or_else(|| "2026-01-01".to_string()),
    };
    Json(TemplateTestResponse {
        rendered: render_template(&request.template, &context),
    })
}

pub(crate) async fn status(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let entries = state.store.count_entries().await?;
    Ok(Json(StatusResponse {
        status: "ok",
        entries,
    }))
}
