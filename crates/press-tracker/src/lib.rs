//! Issue-tracker boundary: webhook event validation and the tracker REST client.
mod client;
mod event;

pub use client::{HttpTrackerClient, HttpTrackerConfig, IssueSnapshot, TrackerClient};
pub use event::{
    evaluate_issue_event, normalize_label, parse_webhook_payload, EventDecision, EventFilter,
    IssueEvent, SkipReason, WebhookPayload,
};

use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `TrackerError` values.
pub enum TrackerError {
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker returned non-success status {status}: {body}")]
    Api { status: u16, body: String },
}
