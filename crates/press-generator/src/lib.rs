//! Changelog draft generation over the LLM provider chain.
//!
//! The generator is polymorphic over `LlmClient`: a primary provider is
//! retried once, then the fallback provider gets one attempt, all under a
//! total deadline. Initial generation never fails the pipeline; when every
//! provider attempt is exhausted it degrades to a placeholder draft flagged
//! for manual authoring.

mod parse;
mod prompt;

use std::sync::Arc;
use std::time::{Duration, Instant};

use press_ai::{CompletionRequest, LlmClient, Message};
use press_tracker::{IssueEvent, IssueSnapshot, TrackerClient};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub use parse::parse_draft;
pub use prompt::{build_generation_messages, build_regeneration_messages};

pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TOTAL_DEADLINE_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Customer-facing draft produced from one issue event.
pub struct ChangelogDraft {
    pub customer_title: String,
    pub customer_description: String,
    pub highlights: Vec<String>,
    pub category: String,
    pub breaking_changes: bool,
    pub migration_notes: Option<String>,
}

#[derive(Debug, Clone)]
/// Result of initial draft generation; always present, possibly a placeholder.
pub struct GenerationOutcome {
    pub draft: ChangelogDraft,
    pub provider: Option<String>,
    pub quality_score: f64,
    pub manual_review_required: bool,
}

#[derive(Debug, Clone)]
/// Result of regeneration with related-story context.
pub struct RegenerationOutcome {
    pub draft: ChangelogDraft,
    pub provider: Option<String>,
    pub quality_score: f64,
    pub related_requested: usize,
    pub related_processed: usize,
    pub failed_stories: Vec<String>,
}

#[derive(Debug, Error)]
/// Enumerates supported `GenerationError` values.
pub enum GenerationError {
    #[error("all providers failed; existing content was kept")]
    AllProvidersFailed,
}

#[derive(Clone)]
/// One provider in the fallback chain.
pub struct ProviderSlot {
    pub client: Arc<dyn LlmClient>,
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone)]
/// Public struct `GeneratorConfig` used across Pressline components.
pub struct GeneratorConfig {
    pub attempt_timeout_ms: u64,
    pub total_deadline_ms: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            total_deadline_ms: DEFAULT_TOTAL_DEADLINE_MS,
            max_output_tokens: 1_024,
            temperature: 0.2,
        }
    }
}

/// Drives the provider chain and turns issue events into changelog drafts.
pub struct DraftGenerator {
    primary: ProviderSlot,
    fallback: Option<ProviderSlot>,
    tracker: Arc<dyn TrackerClient>,
    config: GeneratorConfig,
}

impl DraftGenerator {
    pub fn new(
        primary: ProviderSlot,
        fallback: Option<ProviderSlot>,
        tracker: Arc<dyn TrackerClient>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            tracker,
            config,
        }
    }

    /// Generates a draft for a validated issue event.
    ///
    /// Never fails: when the provider chain is exhausted the placeholder
    /// draft is returned with `manual_review_required` set so the pipeline
    /// still creates a reviewable entry.
    pub async fn generate(&self, event: &IssueEvent) -> GenerationOutcome {
        let messages = build_generation_messages(event);
        match self.run_provider_chain(&messages).await {
            Some((draft, provider)) => {
                let quality_score = score_draft(&draft);
                GenerationOutcome {
                    draft,
                    provider: Some(provider),
                    quality_score,
                    manual_review_required: false,
                }
            }
            None => {
                warn!(
                    issue_key = %event.issue_key,
                    "all providers failed; falling back to placeholder draft"
                );
                GenerationOutcome {
                    draft: placeholder_draft(event),
                    provider: None,
                    quality_score: 0.0,
                    manual_review_required: true,
                }
            }
        }
    }

    /// Regenerates content for an existing pending entry with related-story
    /// context. Unresolvable keys are collected into `failed_stories` and
    /// excluded from the prompt; partial failure is still success. Only a
    /// fully exhausted provider chain is an error, since the entry already
    /// holds reviewable content worth keeping.
    pub async fn regenerate(
        &self,
        issue_key: &str,
        current_title: &str,
        current_description: &str,
        related_keys: &[String],
    ) -> Result<RegenerationOutcome, GenerationError> {
        let related_requested = related_keys.len();
        let mut resolved: Vec<IssueSnapshot> = Vec::new();
        let mut failed_stories: Vec<String> = Vec::new();

        for key in related_keys {
            match self.tracker.fetch_issue(key).await {
                Ok(Some(snapshot)) => resolved.push(snapshot),
                Ok(None) => {
                    warn!(related_key = %key, "related story not found");
                    failed_stories.push(key.clone());
                }
                Err(error) => {
                    warn!(related_key = %key, %error, "related story lookup failed");
                    failed_stories.push(key.clone());
                }
            }
        }

        let messages =
            build_regeneration_messages(issue_key, current_title, current_description, &resolved);
        let Some((draft, provider)) = self.run_provider_chain(&messages).await else {
            return Err(GenerationError::AllProvidersFailed);
        };

        let quality_score = score_draft(&draft);
        Ok(RegenerationOutcome {
            draft,
            provider: Some(provider),
            quality_score,
            related_requested,
            related_processed: resolved.len(),
            failed_stories,
        })
    }

    /// Primary, primary retry, then fallback, all bounded by the total deadline.
    async fn run_provider_chain(&self, messages: &[Message]) -> Option<(ChangelogDraft, String)> {
        let deadline = Instant::now() + Duration::from_millis(self.config.total_deadline_ms.max(1));
        let mut attempts: Vec<&ProviderSlot> = vec![&self.primary, &self.primary];
        if let Some(fallback) = &self.fallback {
            attempts.push(fallback);
        }

        for (attempt, slot) in attempts.into_iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("generation deadline exhausted before attempt {attempt}");
                return None;
            }
            let attempt_budget =
                remaining.min(Duration::from_millis(self.config.attempt_timeout_ms.max(1)));

            let request = CompletionRequest {
                model: slot.model.clone(),
                messages: messages.to_vec(),
                max_tokens: Some(self.config.max_output_tokens),
                temperature: Some(self.config.temperature),
            };
            let response =
                tokio::time::timeout(attempt_budget, slot.client.complete(request)).await;
            match response {
                Ok(Ok(response)) => match parse_draft(&response.text) {
                    Ok(draft) => return Some((draft, slot.name.clone())),
                    Err(reason) => {
                        warn!(
                            provider = %slot.name,
                            attempt,
                            reason = %reason,
                            "provider returned an unusable draft"
                        );
                    }
                },
                Ok(Err(error)) => {
                    warn!(provider = %slot.name, attempt, %error, "provider call failed");
                }
                Err(_) => {
                    warn!(
                        provider = %slot.name,
                        attempt,
                        timeout_ms = attempt_budget.as_millis() as u64,
                        "provider call timed out"
                    );
                }
            }
        }

        None
    }
}

/// Minimal draft used when every provider attempt fails.
pub fn placeholder_draft(event: &IssueEvent) -> ChangelogDraft {
    let description = if event.description.trim().is_empty() {
        event.summary.trim().to_string()
    } else {
        event.description.trim().to_string()
    };
    ChangelogDraft {
        customer_title: event.summary.trim().to_string(),
        customer_description: description,
        highlights: Vec::new(),
        category: "improvement".to_string(),
        breaking_changes: false,
        migration_notes: None,
    }
}

const KNOWN_CATEGORIES: &[&str] = &["feature", "improvement", "fix", "security", "deprecation"];

/// Completeness heuristic in [0, 1]; placeholder drafts are scored 0 upstream.
pub fn score_draft(draft: &ChangelogDraft) -> f64 {
    let mut score = 0.0;
    if !draft.customer_title.trim().is_empty() {
        score += 0.3;
    }
    let description_len = draft.customer_description.trim().len();
    if description_len >= 40 {
        score += 0.3;
    } else if description_len > 0 {
        score += 0.15;
    }
    let highlight_count = draft
        .highlights
        .iter()
        .filter(|highlight| !highlight.trim().is_empty())
        .count()
        .min(3);
    score += highlight_count as f64 * 0.1;
    if KNOWN_CATEGORIES.contains(&draft.category.as_str()) {
        score += 0.1;
    }
    score.min(1.0)
}
