use serde::Deserialize;
use serde_json::Value;

use crate::TrackerError;

/// Normalize a tracker label for case-insensitive matching.
pub fn normalize_label(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Deserialize)]
/// Raw webhook body as delivered by the issue tracker.
pub struct WebhookPayload {
    #[serde(default, rename = "webhookEvent")]
    pub webhook_event: Option<String>,
    pub issue: WebhookIssue,
    #[serde(default)]
    pub changelog: Option<WebhookChangelog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookIssue {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub fields: Option<WebhookIssueFields>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookIssueFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<WebhookStatus>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub priority: Option<WebhookNamed>,
    #[serde(default)]
    pub reporter: Option<WebhookPerson>,
    #[serde(default)]
    pub assignee: Option<WebhookPerson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookStatus {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "statusCategory")]
    pub status_category: Option<WebhookStatusCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookStatusCategory {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNamed {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPerson {
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChangelog {
    #[serde(default)]
    pub items: Vec<WebhookChangelogItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChangelogItem {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default, rename = "fromString")]
    pub from_string: Option<String>,
    #[serde(default, rename = "toString")]
    pub to_string: Option<String>,
}

/// Normalized issue snapshot extracted from one webhook delivery. Transient:
/// dropped once a changelog entry is created or the event is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueEvent {
    pub issue_key: String,
    pub summary: String,
    pub description: String,
    pub status_name: String,
    pub status_category: String,
    pub labels: Vec<String>,
    pub priority: Option<String>,
    pub reporter: Option<String>,
    pub assignee: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone)]
/// Public struct `EventFilter` used across Pressline components.
pub struct EventFilter {
    pub customer_impact_label: String,
    pub done_category: String,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            customer_impact_label: "customer-impact".to_string(),
            done_category: "done".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Reasons a well-formed event is intentionally skipped.
pub enum SkipReason {
    NotIssueUpdate,
    NotDone,
    MissingCustomerImpactLabel,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotIssueUpdate => "event is not an issue update",
            SkipReason::NotDone => "issue is not in the done status category",
            SkipReason::MissingCustomerImpactLabel => "issue lacks the customer-impact label",
        }
    }
}

#[derive(Debug, Clone)]
/// Outcome of filtering one parsed webhook payload.
pub enum EventDecision {
    Process(Box<IssueEvent>),
    Skip(SkipReason),
}

/// Parses and validates a raw webhook body.
///
/// Malformed JSON or a payload missing `issue.key` / `issue.fields.summary`
/// is a `TrackerError::InvalidPayload`; the gateway maps it to a 400.
pub fn parse_webhook_payload(body: &str) -> Result<(WebhookPayload, Value), TrackerError> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|error| TrackerError::InvalidPayload(format!("body is not valid JSON: {error}")))?;
    let payload: WebhookPayload = serde_json::from_value(raw.clone())
        .map_err(|error| TrackerError::InvalidPayload(format!("unexpected payload shape: {error}")))?;

    let key = payload
        .issue
        .key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if key.is_none() {
        return Err(TrackerError::InvalidPayload(
            "issue.key is required".to_string(),
        ));
    }
    let summary = payload
        .issue
        .fields
        .as_ref()
        .and_then(|fields| fields.summary.as_deref())
        .map(str::trim)
        .filter(|summary| !summary.is_empty());
    if summary.is_none() {
        return Err(TrackerError::InvalidPayload(
            "issue.fields.summary is required".to_string(),
        ));
    }

    Ok((payload, raw))
}

/// Applies the done + customer-impact filter to a parsed payload.
///
/// Filtered-out events are not errors: the webhook caller still gets a
/// success response with `changelogCreated: false`.
pub fn evaluate_issue_event(
    payload: &WebhookPayload,
    raw: &Value,
    filter: &EventFilter,
) -> EventDecision {
    if !is_issue_update_event(payload.webhook_event.as_deref()) {
        return EventDecision::Skip(SkipReason::NotIssueUpdate);
    }

    let fields = payload.issue.fields.as_ref();
    let status_category = fields
        .and_then(|fields| fields.status.as_ref())
        .and_then(|status| status.status_category.as_ref())
        .and_then(|category| category.key.as_deref())
        .map(normalize_label)
        .unwrap_or_default();
    let done_category = normalize_label(&filter.done_category);
    let transitioned_to_done = status_category == done_category
        || changelog_moves_status_to(payload.changelog.as_ref(), &done_category);
    if !transitioned_to_done {
        return EventDecision::Skip(SkipReason::NotDone);
    }

    let wanted_label = normalize_label(&filter.customer_impact_label);
    let labels = fields
        .map(|fields| fields.labels.clone())
        .unwrap_or_default();
    if !labels
        .iter()
        .any(|label| normalize_label(label) == wanted_label)
    {
        return EventDecision::Skip(SkipReason::MissingCustomerImpactLabel);
    }

    let event = IssueEvent {
        issue_key: payload
            .issue
            .key
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string(),
        summary: fields
            .and_then(|fields| fields.summary.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string(),
        description: fields
            .and_then(|fields| fields.description.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string(),
        status_name: fields
            .and_then(|fields| fields.status.as_ref())
            .and_then(|status| status.name.clone())
            .unwrap_or_default(),
        status_category,
        labels,
        priority: fields
            .and_then(|fields| fields.priority.as_ref())
            .and_then(|priority| priority.name.clone()),
        reporter: fields
            .and_then(|fields| fields.reporter.as_ref())
            .and_then(|person| person.display_name.clone()),
        assignee: fields
            .and_then(|fields| fields.assignee.as_ref())
            .and_then(|person| person.display_name.clone()),
        raw: raw.clone(),
    };
    EventDecision::Process(Box::new(event))
}

fn is_issue_update_event(webhook_event: Option<&str>) -> bool {
    match webhook_event {
        // Some tracker configurations omit the event name on field-scoped
        // webhooks; the status/label filter still gates those.
        None => true,
        Some(value) => normalize_label(value).contains("issue_updated"),
    }
}

fn changelog_moves_status_to(changelog: Option<&WebhookChangelog>, done_category: &str) -> bool {
    let Some(changelog) = changelog else {
        return false;
    };
    changelog.items.iter().any(|item| {
        item.field
            .as_deref()
            .map(normalize_label)
            .is_some_and(|field| field == "status")
            && item
                .to_string
                .as_deref()
                .map(normalize_label)
                .is_some_and(|target| target == done_category)
    })
}
