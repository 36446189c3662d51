//! Content repository seam
//!
//! The import engine never persists records itself. It calls these operations
//! and reacts to their outcomes: validation and ingest failures are row-level
//! skips, `Interrupted` pauses the run, anything else is fatal.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    ElementTextEntry, IdentifierField, Record, RecordKind, RecordMetadata, UpdateMode,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Record rejected by repository validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// File could not be fetched or stored
    #[error("file ingest failed for '{source_ref}': {reason}")]
    Ingest { source_ref: String, reason: String },

    /// Worker is shutting down or hit a resource limit
    #[error("worker interrupted")]
    Interrupted,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Where file bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    LocalPath(String),
    RemoteUrl(String),
}

impl FileSource {
    /// `http(s)://` values are remote, everything else is a local path
    pub fn classify(value: &str) -> Self {
        let value = value.trim();
        let lower = value.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            FileSource::RemoteUrl(value.to_string())
        } else {
            FileSource::LocalPath(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FileSource::LocalPath(s) | FileSource::RemoteUrl(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Return `Ingest` errors instead of silently skipping bad files
    pub fail_on_invalid: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { fail_on_invalid: true }
    }
}

/// Operations the import engine needs from the content repository
#[async_trait]
pub trait Repository: Send + Sync {
    /// Create an item with the given metadata and element texts
    async fn create_record(
        &self,
        metadata: &RecordMetadata,
        element_texts: &[ElementTextEntry],
    ) -> Result<Record, RepositoryError>;

    /// Ingest a file and attach it to `item`.
    /// Returns `None` when the file was invalid and `fail_on_invalid` is off.
    async fn attach_file(
        &self,
        item: &Record,
        source: &FileSource,
        options: IngestOptions,
    ) -> Result<Option<Record>, RepositoryError>;

    /// Delete a record together with its files and element texts
    async fn delete_record(&self, record: &Record) -> Result<(), RepositoryError>;

    /// Resolve records by id; missing ids are left out
    async fn find_records(&self, ids: &[i64]) -> Result<Vec<Record>, RepositoryError>;

    /// File record whose original filename matches exactly
    async fn find_record_by_filename(&self, filename: &str) -> Result<Option<Record>, RepositoryError>;

    /// First record matching `field = value`, optionally restricted to a kind
    async fn find_record_by_identifier(
        &self,
        kind: Option<RecordKind>,
        field: &IdentifierField,
        value: &str,
    ) -> Result<Option<Record>, RepositoryError>;

    /// Write element texts. `Replace`/`ReplaceAll` first remove existing
    /// values of every element id present in `entries`; empty entries are
    /// never stored.
    async fn update_element_texts(
        &self,
        record: &Record,
        entries: &[ElementTextEntry],
        mode: UpdateMode,
    ) -> Result<(), RepositoryError>;

    /// Set or clear the display order of a file
    async fn set_file_order(&self, file: &Record, order: Option<i32>) -> Result<(), RepositoryError>;

    /// Collection whose Dublin Core Title equals `title` (case-sensitive)
    async fn find_collection_by_title(&self, title: &str) -> Result<Option<Record>, RepositoryError>;

    /// Create a private, unfeatured collection titled `title`
    async fn create_collection(&self, title: &str) -> Result<Record, RepositoryError>;
}
