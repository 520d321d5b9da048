//! Changelog entry model, approval state machine, and store backends.
//!
//! The store exclusively owns `ChangelogEntry` state transitions: the
//! generator and sync-back writer go through the update contract here and
//! never mutate rows directly. All mutating operations are compare-and-swap
//! on the entry `revision` so a stale regeneration cannot clobber a
//! concurrent human approval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteChangelogStore;

/// Result type for changelog store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry '{0}' not found")]
    NotFound(String),
    #[error("invalid approval status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ApprovalStatus,
        to: ApprovalStatus,
    },
    #[error("entry '{0}' was modified concurrently; retry against fresh state")]
    ConcurrentModification(String),
    #[error("approval requires a non-empty customer-facing title")]
    EmptyTitle,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ApprovalStatus` values.
pub enum ApprovalStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Published,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::PendingReview => "pending_review",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ApprovalStatus::Draft),
            "pending_review" => Some(ApprovalStatus::PendingReview),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "published" => Some(ApprovalStatus::Published),
            _ => None,
        }
    }

    /// Legal transitions: draft -> pending_review -> {approved, rejected},
    /// approved -> published. Rejected is terminal for the entry instance.
    pub fn can_transition_to(&self, to: ApprovalStatus) -> bool {
        matches!(
            (self, to),
            (ApprovalStatus::Draft, ApprovalStatus::PendingReview)
                | (ApprovalStatus::PendingReview, ApprovalStatus::Approved)
                | (ApprovalStatus::PendingReview, ApprovalStatus::Rejected)
                | (ApprovalStatus::Approved, ApprovalStatus::Published)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Typed source-data attachment recording where an entry came from.
pub struct SourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Typed generation-metadata attachment recording provenance and flags.
pub struct GenerationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub auto_generated: bool,
    #[serde(default)]
    pub manual_review_required: bool,
    #[serde(default)]
    pub sync_back_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Persistent changelog entry, the unit of the approval workflow.
pub struct ChangelogEntry {
    pub id: String,
    pub issue_key: String,
    pub customer_title: String,
    pub customer_description: String,
    pub highlights: Vec<String>,
    pub category: String,
    pub target_audience: String,
    pub quality_score: f64,
    pub approval_status: ApprovalStatus,
    pub public_visibility: bool,
    pub public_changelog_visible: bool,
    pub version_label: Option<String>,
    pub release_date: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub breaking_changes: bool,
    pub migration_notes: Option<String>,
    pub source_data: SourceData,
    pub generation_metadata: GenerationMetadata,
    pub tags: Vec<String>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
/// Input for creating a new entry; the store assigns id, revision, and timestamps.
pub struct NewEntry {
    pub issue_key: String,
    pub customer_title: String,
    pub customer_description: String,
    pub highlights: Vec<String>,
    pub category: String,
    pub target_audience: String,
    pub quality_score: f64,
    pub breaking_changes: bool,
    pub migration_notes: Option<String>,
    pub source_data: SourceData,
    pub generation_metadata: GenerationMetadata,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
/// Content replacement applied by regeneration while an entry awaits review.
pub struct ContentUpdate {
    pub customer_title: String,
    pub customer_description: String,
    pub highlights: Vec<String>,
    pub category: String,
    pub quality_score: f64,
    pub breaking_changes: bool,
    pub migration_notes: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default)]
/// Reviewer-supplied fields applied on approval.
pub struct ApprovalUpdate {
    pub customer_facing_title: Option<String>,
    pub public_visibility: Option<bool>,
    pub source_data: Option<SourceData>,
}

#[derive(Debug, Clone)]
/// Outcome of the atomic insert-if-absent creation path.
pub enum CreateOutcome {
    Created(ChangelogEntry),
    /// An active (non-rejected) entry already exists for the issue key.
    Duplicate(ChangelogEntry),
}

#[derive(Debug, Clone, Default)]
/// Filter for listing entries.
pub struct EntryFilter {
    pub status: Option<ApprovalStatus>,
    pub issue_key: Option<String>,
}

static ENTRY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a process-unique entry identifier.
pub fn new_entry_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = ENTRY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("entry-{millis}-{count}")
}

/// Async store contract used by the gateway pipeline.
#[async_trait]
pub trait ChangelogStore: Send + Sync {
    /// Atomic insert-if-absent keyed on issue key: at most one active
    /// (non-rejected) entry per key, safe under concurrent duplicate
    /// webhook deliveries.
    async fn create_entry_if_absent(&self, new_entry: NewEntry) -> StoreResult<CreateOutcome>;

    async fn get_entry(&self, id: &str) -> StoreResult<Option<ChangelogEntry>>;
    async fn find_active_by_issue_key(&self, issue_key: &str)
        -> StoreResult<Option<ChangelogEntry>>;
    async fn list_entries(&self, filter: EntryFilter) -> StoreResult<Vec<ChangelogEntry>>;
    async fn count_entries(&self) -> StoreResult<u64>;

    async fn update_content(
        &self,
        id: &str,
        expected_revision: i64,
        update: ContentUpdate,
    ) -> StoreResult<ChangelogEntry>;
    async fn approve(
        &self,
        id: &str,
        expected_revision: i64,
        update: ApprovalUpdate,
    ) -> StoreResult<ChangelogEntry>;
    async fn reject(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry>;
    async fn publish(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry>;

    /// Flag-only update recording sync-back delivery state; intentionally not
    /// revision-checked, it never races with content edits.
    async fn set_sync_back_pending(&self, id: &str, pending: bool) -> StoreResult<()>;
}

impl NewEntry {
    fn into_entry(self, now: DateTime<Utc>) -> ChangelogEntry {
        ChangelogEntry {
            id: new_entry_id(),
            issue_key: self.issue_key,
            customer_title: self.customer_title,
            customer_description: self.customer_description,
            highlights: self.highlights,
            category: self.category,
            target_audience: self.target_audience,
            quality_score: self.quality_score,
            approval_status: ApprovalStatus::PendingReview,
            public_visibility: false,
            public_changelog_visible: false,
            version_label: None,
            release_date: None,
            approved_at: None,
            breaking_changes: self.breaking_changes,
            migration_notes: self.migration_notes,
            source_data: self.source_data,
            generation_metadata: self.generation_metadata,
            tags: self.tags,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

fn apply_content_update(
    entry: &ChangelogEntry,
    update: ContentUpdate,
    now: DateTime<Utc>,
) -> StoreResult<ChangelogEntry> {
    if entry.approval_status != ApprovalStatus::PendingReview {
        return Err(StoreError::InvalidTransition {
            from: entry.approval_status,
            to: ApprovalStatus::PendingReview,
        });
    }

    let mut next = entry.clone();
    next.customer_title = update.customer_title;
    next.customer_description = update.customer_description;
    next.highlights = update.highlights;
    next.category = update.category;
    next.quality_score = update.quality_score;
    next.breaking_changes = update.breaking_changes;
    next.migration_notes = update.migration_notes;
    if update.provider.is_some() {
        next.generation_metadata.provider = update.provider;
        next.generation_metadata.auto_generated = true;
        next.generation_metadata.manual_review_required = false;
    }
    next.revision += 1;
    next.updated_at = now;
    Ok(next)
}

fn apply_approval(
    entry: &ChangelogEntry,
    update: ApprovalUpdate,
    now: DateTime<Utc>,
) -> StoreResult<ChangelogEntry> {
    if !entry
        .approval_status
        .can_transition_to(ApprovalStatus::Approved)
    {
        return Err(StoreError::InvalidTransition {
            from: entry.approval_status,
            to: ApprovalStatus::Approved,
        });
    }

    let mut next = entry.clone();
    if let Some(title) = update.customer_facing_title {
        next.customer_title = title.trim().to_string();
    }
    if next.customer_title.trim().is_empty() {
        return Err(StoreError::EmptyTitle);
    }
    if let Some(public_visibility) = update.public_visibility {
        next.public_visibility = public_visibility;
    }
    if let Some(source_data) = update.source_data {
        if source_data.issue_key.is_some() {
            next.source_data.issue_key = source_data.issue_key;
        }
        if source_data.category.is_some() {
            next.source_data.category = source_data.category;
        }
        if source_data.generated_by.is_some() {
            next.source_data.generated_by = source_data.generated_by;
        }
    }
    next.approval_status = ApprovalStatus::Approved;
    next.approved_at = Some(now);
    next.revision += 1;
    next.updated_at = now;
    Ok(next)
}

fn apply_rejection(entry: &ChangelogEntry, now: DateTime<Utc>) -> StoreResult<ChangelogEntry> {
    if !entry
        .approval_status
        .can_transition_to(ApprovalStatus::Rejected)
    {
        return Err(StoreError::InvalidTransition {
            from: entry.approval_status,
            to: ApprovalStatus::Rejected,
        });
    }

    let mut next = entry.clone();
    next.approval_status = ApprovalStatus::Rejected;
    next.revision += 1;
    next.updated_at = now;
    Ok(next)
}

fn apply_publish(entry: &ChangelogEntry, now: DateTime<Utc>) -> StoreResult<ChangelogEntry> {
    if !entry
        .approval_status
        .can_transition_to(ApprovalStatus::Published)
    {
        return Err(StoreError::InvalidTransition {
            from: entry.approval_status,
            to: ApprovalStatus::Published,
        });
    }

    // Visibility flip only; content is frozen at approval time.
    let mut next = entry.clone();
    next.approval_status = ApprovalStatus::Published;
    next.public_changelog_visible = true;
    next.revision += 1;
    next.updated_at = now;
    Ok(next)
}

fn matches_filter(entry: &ChangelogEntry, filter: &EntryFilter) -> bool {
    if let Some(status) = filter.status {
        if entry.approval_status != status {
            return false;
        }
    }
    if let Some(issue_key) = filter.issue_key.as_deref() {
        if entry.issue_key != issue_key {
            return false;
        }
    }
    true
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct MemoryChangelogStore {
    entries: RwLock<HashMap<String, ChangelogEntry>>,
}

impl MemoryChangelogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangelogStore for MemoryChangelogStore {
    async fn create_entry_if_absent(&self, new_entry: NewEntry) -> StoreResult<CreateOutcome> {
        let mut entries = self.entries.write().await;
        let existing = entries
            .values()
            .find(|entry| {
                entry.issue_key == new_entry.issue_key
                    && entry.approval_status != ApprovalStatus::Rejected
            })
            .cloned();
        if let Some(existing) = existing {
            return Ok(CreateOutcome::Duplicate(existing));
        }

        let entry = new_entry.into_entry(Utc::now());
        entries.insert(entry.id.clone(), entry.clone());
        Ok(CreateOutcome::Created(entry))
    }

    async fn get_entry(&self, id: &str) -> StoreResult<Option<ChangelogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(id).cloned())
    }

    async fn find_active_by_issue_key(
        &self,
        issue_key: &str,
    ) -> StoreResult<Option<ChangelogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .find(|entry| {
                entry.issue_key == issue_key && entry.approval_status != ApprovalStatus::Rejected
            })
            .cloned())
    }

    async fn list_entries(&self, filter: EntryFilter) -> StoreResult<Vec<ChangelogEntry>> {
        let entries = self.entries.read().await;
        let mut matched = entries
            .values()
            .filter(|entry| matches_filter(entry, &filter))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn count_entries(&self) -> StoreResult<u64> {
        let entries = self.entries.read().await;
        Ok(entries.len() as u64)
    }

    async fn update_content(
        &self,
        id: &str,
        expected_revision: i64,
        update: ContentUpdate,
    ) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_content_update(entry, update, Utc::now())
        })
        .await
    }

    async fn approve(
        &self,
        id: &str,
        expected_revision: i64,
        update: ApprovalUpdate,
    ) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_approval(entry, update, Utc::now())
        })
        .await
    }

    async fn reject(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_rejection(entry, Utc::now())
        })
        .await
    }

    async fn publish(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_publish(entry, Utc::now())
        })
        .await
    }

    async fn set_sync_back_pending(&self, id: &str, pending: bool) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.generation_metadata.sync_back_pending = pending;
        entry.updated_at = Utc::now();
        Ok(())
    }
}

impl MemoryChangelogStore {
    async fn mutate<F>(&self, id: &str, expected_revision: i64, apply: F) -> StoreResult<ChangelogEntry>
    where
        F: FnOnce(&ChangelogEntry) -> StoreResult<ChangelogEntry>,
    {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.revision != expected_revision {
            return Err(StoreError::ConcurrentModification(id.to_string()));
        }
        let next = apply(entry)?;
        entries.insert(next.id.clone(), next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new_entry(issue_key: &str) -> NewEntry {
        NewEntry {
            issue_key: issue_key.to_string(),
            customer_title: "CSV export for reports".to_string(),
            customer_description: "You can now export any report as CSV.".to_string(),
            highlights: vec!["Export any report".to_string()],
            category: "feature".to_string(),
            target_audience: "customers".to_string(),
            quality_score: 0.8,
            breaking_changes: false,
            migration_notes: None,
            source_data: SourceData {
                issue_key: Some(issue_key.to_string()),
                category: Some("feature".to_string()),
                generated_by: Some("pressline".to_string()),
            },
            generation_metadata: GenerationMetadata {
                provider: Some("openai".to_string()),
                auto_generated: true,
                ..GenerationMetadata::default()
            },
            tags: vec!["reporting".to_string()],
        }
    }

    #[test]
    fn unit_status_transitions_follow_state_machine() {
        use ApprovalStatus::*;
        assert!(Draft.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Approved));
        assert!(PendingReview.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Published));
        assert!(!Rejected.can_transition_to(PendingReview));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Published.can_transition_to(Approved));
    }

    #[test]
    fn unit_status_round_trips_through_strings() {
        for status in [
            ApprovalStatus::Draft,
            ApprovalStatus::PendingReview,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Published,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::parse("archived"), None);
    }

    #[tokio::test]
    async fn functional_create_enters_pending_review_and_dedupes() {
        let store = MemoryChangelogStore::new();
        let outcome = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create");
        let entry = match outcome {
            CreateOutcome::Created(entry) => entry,
            CreateOutcome::Duplicate(_) => panic!("first create must not be a duplicate"),
        };
        assert_eq!(entry.approval_status, ApprovalStatus::PendingReview);
        assert_eq!(entry.revision, 1);
        assert!(entry.approved_at.is_none());

        let second = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("second create");
        match second {
            CreateOutcome::Duplicate(existing) => assert_eq!(existing.id, entry.id),
            CreateOutcome::Created(_) => panic!("duplicate delivery created a second entry"),
        }
    }

    #[tokio::test]
    async fn functional_rejected_entry_does_not_block_new_creation() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-7"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };
        store.reject(&entry.id, entry.revision).await.expect("reject");

        let outcome = store
            .create_entry_if_absent(sample_new_entry("PRESS-7"))
            .await
            .expect("re-create");
        assert!(matches!(outcome, CreateOutcome::Created(_)));
    }

    #[tokio::test]
    async fn functional_approve_sets_timestamp_and_visibility() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };

        let approved = store
            .approve(
                &entry.id,
                entry.revision,
                ApprovalUpdate {
                    customer_facing_title: Some("Polished title".to_string()),
                    public_visibility: Some(true),
                    source_data: None,
                },
            )
            .await
            .expect("approve");
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert!(approved.approved_at.is_some());
        assert!(approved.public_visibility);
        assert_eq!(approved.customer_title, "Polished title");
        assert_eq!(approved.revision, 2);
    }

    #[tokio::test]
    async fn functional_approve_with_empty_title_fails_without_state_change() {
        let store = MemoryChangelogStore::new();
        let mut new_entry = sample_new_entry("PRESS-100");
        new_entry.customer_title = String::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(new_entry)
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };

        let error = store
            .approve(&entry.id, entry.revision, ApprovalUpdate::default())
            .await
            .expect_err("must fail");
        assert!(matches!(error, StoreError::EmptyTitle));

        let unchanged = store.get_entry(&entry.id).await.expect("get").expect("entry");
        assert_eq!(unchanged.approval_status, ApprovalStatus::PendingReview);
        assert!(unchanged.approved_at.is_none());
    }

    #[tokio::test]
    async fn functional_regenerate_blocked_after_approval() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };
        let approved = store
            .approve(&entry.id, entry.revision, ApprovalUpdate::default())
            .await
            .expect("approve");

        let error = store
            .update_content(&entry.id, approved.revision, ContentUpdate::default())
            .await
            .expect_err("must fail");
        assert!(matches!(error, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn functional_publish_flips_public_changelog_visibility_only() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };
        let approved = store
            .approve(&entry.id, entry.revision, ApprovalUpdate::default())
            .await
            .expect("approve");
        let published = store
            .publish(&entry.id, approved.revision)
            .await
            .expect("publish");
        assert_eq!(published.approval_status, ApprovalStatus::Published);
        assert!(published.public_changelog_visible);
        assert_eq!(published.customer_title, approved.customer_title);
    }

    #[tokio::test]
    async fn regression_stale_revision_loses_optimistic_concurrency_race() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };

        // Reviewer approves while a regeneration holds the old revision.
        store
            .approve(&entry.id, entry.revision, ApprovalUpdate::default())
            .await
            .expect("approve");
        let error = store
            .update_content(&entry.id, entry.revision, ContentUpdate::default())
            .await
            .expect_err("stale writer must lose");
        assert!(matches!(error, StoreError::ConcurrentModification(_)));
    }

    #[tokio::test]
    async fn unit_sync_back_flag_updates_without_revision_bump() {
        let store = MemoryChangelogStore::new();
        let CreateOutcome::Created(entry) = store
            .create_entry_if_absent(sample_new_entry("PRESS-100"))
            .await
            .expect("create")
        else {
            panic!("expected creation");
        };
        store
            .set_sync_back_pending(&entry.id, true)
            .await
            .expect("flag");
        let updated = store.get_entry(&entry.id).await.expect("get").expect("entry");
        assert!(updated.generation_metadata.sync_back_pending);
        assert_eq!(updated.revision, entry.revision);
    }
}
