//! Request-scoped pipeline steps: webhook processing, post-commit
//! notification, and post-approval sync-back.
//!
//! Notification and sync-back run only after the triggering store operation
//! has committed, and their failures never change the outcome reported to
//! the caller.

use std::sync::Arc;

use press_generator::GenerationOutcome;
use press_notify::{render_template, NotificationOutcome, TemplateContext, DEFAULT_TEMPLATE_NAME};
use press_store::{
    ChangelogEntry, CreateOutcome, GenerationMetadata, NewEntry, SourceData, StoreError,
};
use press_tracker::{evaluate_issue_event, parse_webhook_payload, EventDecision, IssueEvent};
use tracing::{info, warn};

use crate::state::GatewayState;
use crate::types::WebhookResponse;

#[derive(Debug)]
pub(crate) enum WebhookError {
    Invalid(String),
    Store(StoreError),
}

/// Full webhook path: parse, filter, generate, atomically create, notify.
pub(crate) async fn process_webhook(
    state: &Arc<GatewayState>,
    body: &str,
) -> Result<WebhookResponse, WebhookError> {
    let (payload, raw) =
        parse_webhook_payload(body).map_err(|error| WebhookError::Invalid(error.to_string()))?;

    let event = match evaluate_issue_event(&payload, &raw, &state.config.event_filter) {
        EventDecision::Process(event) => *event,
        EventDecision::Skip(reason) => {
            info!(reason = reason.as_str(), "webhook event filtered out");
            return Ok(WebhookResponse {
                success: true,
                message: format!("event skipped: {}", reason.as_str()),
                changelog_created: false,
            });
        }
    };

    // Cheap duplicate probe before spending provider budget; the atomic
    // insert below remains the real guarantee under concurrent deliveries.
    match state.store.find_active_by_issue_key(&event.issue_key).await {
        Ok(Some(existing)) => {
            info!(issue_key = %event.issue_key, entry_id = %existing.id, "duplicate webhook delivery");
            return Ok(WebhookResponse {
                success: true,
                message: format!("active entry already exists for {}", event.issue_key),
                changelog_created: false,
            });
        }
        Ok(None) => {}
        Err(error) => return Err(WebhookError::Store(error)),
    }

    let outcome = state.generator.generate(&event).await;
    let new_entry = new_entry_from_outcome(&event, &outcome);
    let created = state
        .store
        .create_entry_if_absent(new_entry)
        .await
        .map_err(WebhookError::Store)?;

    let entry = match created {
        CreateOutcome::Created(entry) => entry,
        CreateOutcome::Duplicate(existing) => {
            // A concurrent delivery won the insert race.
            info!(issue_key = %event.issue_key, entry_id = %existing.id, "duplicate webhook delivery");
            return Ok(WebhookResponse {
                success: true,
                message: format!("active entry already exists for {}", event.issue_key),
                changelog_created: false,
            });
        }
    };

    info!(
        issue_key = %entry.issue_key,
        entry_id = %entry.id,
        provider = entry.generation_metadata.provider.as_deref().unwrap_or("none"),
        manual_review = entry.generation_metadata.manual_review_required,
        "changelog entry created"
    );
    notify_entry_created(state, &entry).await;

    let message = if entry.generation_metadata.manual_review_required {
        format!(
            "entry {} created with placeholder content; manual authoring required",
            entry.id
        )
    } else {
        format!("entry {} created and pending review", entry.id)
    };
    Ok(WebhookResponse {
        success: true,
        message,
        changelog_created: true,
    })
}

fn new_entry_from_outcome(event: &IssueEvent, outcome: &GenerationOutcome) -> NewEntry {
    NewEntry {
        issue_key: event.issue_key.clone(),
        customer_title: outcome.draft.customer_title.clone(),
        customer_description: outcome.draft.customer_description.clone(),
        highlights: outcome.draft.highlights.clone(),
        category: outcome.draft.category.clone(),
        target_audience: "customers".to_string(),
        quality_score: outcome.quality_score,
        breaking_changes: outcome.draft.breaking_changes,
        migration_notes: outcome.draft.migration_notes.clone(),
        source_data: SourceData {
            issue_key: Some(event.issue_key.clone()),
            category: Some(outcome.draft.category.clone()),
            generated_by: Some("pressline".to_string()),
        },
        generation_metadata: GenerationMetadata {
            provider: outcome.provider.clone(),
            auto_generated: outcome.provider.is_some(),
            manual_review_required: outcome.manual_review_required,
            sync_back_pending: false,
        },
        tags: event.labels.clone(),
    }
}

/// Renders the review template and posts it; best-effort.
pub(crate) async fn notify_entry_created(state: &Arc<GatewayState>, entry: &ChangelogEntry) {
    let Some(template) = state.templates.get(DEFAULT_TEMPLATE_NAME) else {
        warn!("default review template missing; skipping notification");
        return;
    };
    if !template.enabled {
        return;
    }

    let context = TemplateContext {
        content_title: entry.customer_title.clone(),
        content_type: entry.category.clone(),
        quality_score: entry.quality_score,
        content_url: state.entry_url(&entry.id),
        created_date: entry.created_at.format("%Y-%m-%d").to_string(),
    };
    let text = render_template(&template.template, &context);
    let record = state.notifier.send(&template.channel, &text).await;
    if record.outcome == NotificationOutcome::Failed {
        warn!(
            entry_id = %entry.id,
            channel = %record.channel,
            "review notification not delivered; entry state is unaffected"
        );
    }
}

/// Writes the approved summary back onto the source issue; best-effort.
///
/// A failure flips `sync_back_pending` on the entry so an operator can
/// re-run it; the approval itself is never reverted.
pub(crate) async fn sync_back_approved(state: &Arc<GatewayState>, entry: &ChangelogEntry) {
    let field_id = state.config.sync_back_field_id.trim();
    if field_id.is_empty() {
        return;
    }

    match state
        .tracker
        .write_summary_field(&entry.issue_key, field_id, &entry.customer_description)
        .await
    {
        Ok(()) => {
            if entry.generation_metadata.sync_back_pending {
                if let Err(error) = state.store.set_sync_back_pending(&entry.id, false).await {
                    warn!(entry_id = %entry.id, %error, "failed to clear sync-back flag");
                }
            }
            info!(entry_id = %entry.id, issue_key = %entry.issue_key, "summary synced back to tracker");
        }
        Err(error) => {
            warn!(
                entry_id = %entry.id,
                issue_key = %entry.issue_key,
                %error,
                "sync-back failed; approval stands and the entry is flagged for retry"
            );
            if let Err(error) = state.store.set_sync_back_pending(&entry.id, true).await {
                warn!(entry_id = %entry.id, %error, "failed to record sync-back flag");
            }
        }
    }
}
