//! SQLite-backed `ChangelogStore` implementation with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    apply_approval, apply_content_update, apply_publish, apply_rejection, ApprovalStatus,
    ApprovalUpdate, ChangelogEntry, ChangelogStore, ContentUpdate, CreateOutcome, EntryFilter,
    GenerationMetadata, NewEntry, SourceData, StoreError, StoreResult,
};

/// Persistent SQLite store backend for changelog entries.
#[derive(Debug)]
pub struct SqliteChangelogStore {
    db_path: PathBuf,
}

impl SqliteChangelogStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS changelog_entries (
                id TEXT PRIMARY KEY,
                issue_key TEXT NOT NULL,
                customer_title TEXT NOT NULL,
                customer_description TEXT NOT NULL,
                highlights_json TEXT NOT NULL,
                category TEXT NOT NULL,
                target_audience TEXT NOT NULL,
                quality_score REAL NOT NULL,
                approval_status TEXT NOT NULL,
                public_visibility INTEGER NOT NULL,
                public_changelog_visible INTEGER NOT NULL,
                version_label TEXT NULL,
                release_date TEXT NULL,
                approved_at TEXT NULL,
                breaking_changes INTEGER NOT NULL,
                migration_notes TEXT NULL,
                source_data_json TEXT NOT NULL,
                generation_metadata_json TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                revision INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_changelog_entries_active_issue_key
                ON changelog_entries (issue_key) WHERE approval_status != 'rejected';

            CREATE INDEX IF NOT EXISTS idx_changelog_entries_status
                ON changelog_entries (approval_status, created_at);
            "#,
        )?;
        Ok(())
    }

    fn mutate<F>(&self, id: &str, expected_revision: i64, apply: F) -> StoreResult<ChangelogEntry>
    where
        F: FnOnce(&ChangelogEntry) -> StoreResult<ChangelogEntry>,
    {
        let mut connection = self.open_connection()?;
        let transaction =
            connection.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let entry = transaction
            .query_row(
                "SELECT * FROM changelog_entries WHERE id = ?1",
                params![id],
                entry_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.revision != expected_revision {
            return Err(StoreError::ConcurrentModification(id.to_string()));
        }

        let next = apply(&entry)?;
        let updated = transaction.execute(
            r#"
            UPDATE changelog_entries SET
                customer_title = ?1,
                customer_description = ?2,
                highlights_json = ?3,
                category = ?4,
                target_audience = ?5,
                quality_score = ?6,
                approval_status = ?7,
                public_visibility = ?8,
                public_changelog_visible = ?9,
                version_label = ?10,
                release_date = ?11,
                approved_at = ?12,
                breaking_changes = ?13,
                migration_notes = ?14,
                source_data_json = ?15,
                generation_metadata_json = ?16,
                tags_json = ?17,
                revision = ?18,
                updated_at = ?19
            WHERE id = ?20 AND revision = ?21
            "#,
            params![
                next.customer_title,
                next.customer_description,
                serde_json::to_string(&next.highlights)?,
                next.category,
                next.target_audience,
                next.quality_score,
                next.approval_status.as_str(),
                next.public_visibility as i64,
                next.public_changelog_visible as i64,
                next.version_label,
                next.release_date.map(|value| value.to_rfc3339()),
                next.approved_at.map(|value| value.to_rfc3339()),
                next.breaking_changes as i64,
                next.migration_notes,
                serde_json::to_string(&next.source_data)?,
                serde_json::to_string(&next.generation_metadata)?,
                serde_json::to_string(&next.tags)?,
                next.revision,
                next.updated_at.to_rfc3339(),
                id,
                expected_revision,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::ConcurrentModification(id.to_string()));
        }

        transaction.commit()?;
        Ok(next)
    }
}

#[async_trait]
impl ChangelogStore for SqliteChangelogStore {
    async fn create_entry_if_absent(&self, new_entry: NewEntry) -> StoreResult<CreateOutcome> {
        let issue_key = new_entry.issue_key.clone();
        let entry = new_entry.into_entry(Utc::now());

        let mut connection = self.open_connection()?;
        let transaction =
            connection.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        // Single-statement insert-if-absent against the partial unique index:
        // at-least-once webhook delivery must never create a second active row.
        let inserted = transaction.execute(
            r#"
            INSERT INTO changelog_entries (
                id, issue_key, customer_title, customer_description, highlights_json,
                category, target_audience, quality_score, approval_status,
                public_visibility, public_changelog_visible, version_label,
                release_date, approved_at, breaking_changes, migration_notes,
                source_data_json, generation_metadata_json, tags_json,
                revision, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
            )
            ON CONFLICT (issue_key) WHERE approval_status != 'rejected' DO NOTHING
            "#,
            params![
                entry.id,
                entry.issue_key,
                entry.customer_title,
                entry.customer_description,
                serde_json::to_string(&entry.highlights)?,
                entry.category,
                entry.target_audience,
                entry.quality_score,
                entry.approval_status.as_str(),
                entry.public_visibility as i64,
                entry.public_changelog_visible as i64,
                entry.version_label,
                entry.release_date.map(|value| value.to_rfc3339()),
                entry.approved_at.map(|value| value.to_rfc3339()),
                entry.breaking_changes as i64,
                entry.migration_notes,
                serde_json::to_string(&entry.source_data)?,
                serde_json::to_string(&entry.generation_metadata)?,
                serde_json::to_string(&entry.tags)?,
                entry.revision,
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
            ],
        )?;

        if inserted == 0 {
            let existing = transaction
                .query_row(
                    "SELECT * FROM changelog_entries
                     WHERE issue_key = ?1 AND approval_status != 'rejected'",
                    params![issue_key],
                    entry_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(issue_key.clone()))?;
            transaction.commit()?;
            return Ok(CreateOutcome::Duplicate(existing));
        }

        transaction.commit()?;
        Ok(CreateOutcome::Created(entry))
    }

    async fn get_entry(&self, id: &str) -> StoreResult<Option<ChangelogEntry>> {
        let connection = self.open_connection()?;
        let entry = connection
            .query_row(
                "SELECT * FROM changelog_entries WHERE id = ?1",
                params![id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    async fn find_active_by_issue_key(
        &self,
        issue_key: &str,
    ) -> StoreResult<Option<ChangelogEntry>> {
        let connection = self.open_connection()?;
        let entry = connection
            .query_row(
                "SELECT * FROM changelog_entries
                 WHERE issue_key = ?1 AND approval_status != 'rejected'",
                params![issue_key],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    async fn list_entries(&self, filter: EntryFilter) -> StoreResult<Vec<ChangelogEntry>> {
        let connection = self.open_connection()?;
        let mut query =
            String::from("SELECT * FROM changelog_entries WHERE 1 = 1");
        let mut params_list: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" AND approval_status = ?");
            params_list.push(Box::new(status.as_str().to_string()));
        }
        if let Some(issue_key) = filter.issue_key {
            query.push_str(" AND issue_key = ?");
            params_list.push(Box::new(issue_key));
        }
        query.push_str(" ORDER BY created_at DESC, id ASC");

        let mut statement = connection.prepare(&query)?;
        let rows = statement.query_map(
            rusqlite::params_from_iter(params_list.iter().map(|param| param.as_ref())),
            entry_from_row,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    async fn count_entries(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM changelog_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
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
    }

    async fn reject(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_rejection(entry, Utc::now())
        })
    }

    async fn publish(&self, id: &str, expected_revision: i64) -> StoreResult<ChangelogEntry> {
        self.mutate(id, expected_revision, |entry| {
            apply_publish(entry, Utc::now())
        })
    }

    async fn set_sync_back_pending(&self, id: &str, pending: bool) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction =
            connection.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let metadata_json: Option<String> = transaction
            .query_row(
                "SELECT generation_metadata_json FROM changelog_entries WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let metadata_json = metadata_json.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut metadata: GenerationMetadata = serde_json::from_str(&metadata_json)?;
        metadata.sync_back_pending = pending;
        transaction.execute(
            "UPDATE changelog_entries SET generation_metadata_json = ?1, updated_at = ?2
             WHERE id = ?3",
            params![
                serde_json::to_string(&metadata)?,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ChangelogEntry> {
    let status_raw: String = row.get("approval_status")?;
    let approval_status = ApprovalStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown approval status '{status_raw}'").into(),
        )
    })?;

    let highlights_json: String = row.get("highlights_json")?;
    let source_data_json: String = row.get("source_data_json")?;
    let generation_metadata_json: String = row.get("generation_metadata_json")?;
    let tags_json: String = row.get("tags_json")?;

    Ok(ChangelogEntry {
        id: row.get("id")?,
        issue_key: row.get("issue_key")?,
        customer_title: row.get("customer_title")?,
        customer_description: row.get("customer_description")?,
        highlights: json_column(&highlights_json, "highlights_json")?,
        category: row.get("category")?,
        target_audience: row.get("target_audience")?,
        quality_score: row.get("quality_score")?,
        approval_status,
        public_visibility: row.get::<_, i64>("public_visibility")? != 0,
        public_changelog_visible: row.get::<_, i64>("public_changelog_visible")? != 0,
        version_label: row.get("version_label")?,
        release_date: timestamp_column(row.get::<_, Option<String>>("release_date")?)?,
        approved_at: timestamp_column(row.get::<_, Option<String>>("approved_at")?)?,
        breaking_changes: row.get::<_, i64>("breaking_changes")? != 0,
        migration_notes: row.get("migration_notes")?,
        source_data: json_column::<SourceData>(&source_data_json, "source_data_json")?,
        generation_metadata: json_column::<GenerationMetadata>(
            &generation_metadata_json,
            "generation_metadata_json",
        )?,
        tags: json_column(&tags_json, "tags_json")?,
        revision: row.get("revision")?,
        created_at: required_timestamp_column(row.get::<_, String>("created_at")?)?,
        updated_at: required_timestamp_column(row.get::<_, String>("updated_at")?)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(
    raw: &str,
    field: &'static str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid JSON in {field}: {error}").into(),
        )
    })
}

fn timestamp_column(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match raw {
        None => Ok(None),
        Some(value) => required_timestamp_column(value).map(Some),
    }
}

fn required_timestamp_column(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid timestamp '{raw}': {error}").into(),
            )
        })
}
