//! Postgres-backed reference content repository

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::queries::record as queries;
use crate::services::file_ingest::FileIngester;
use crate::services::repository::{FileSource, IngestOptions, Repository, RepositoryError};
use crate::types::{ElementTextEntry, IdentifierField, Record, RecordKind, RecordMetadata, UpdateMode};

/// Postgres error code for foreign key violations
const FOREIGN_KEY_VIOLATION: &str = "23503";

pub struct PgRepository {
    pool: PgPool,
    ingester: FileIngester,
    title_element_id: i64,
}

impl PgRepository {
    /// Build the repository; the Dublin Core Title element must exist
    pub async fn new(pool: PgPool, ingester: FileIngester) -> anyhow::Result<Self> {
        let title_element_id = queries::find_element_id(&pool, "Dublin Core", "Title")
            .await?
            .ok_or_else(|| anyhow!("element 'Dublin Core:Title' is missing, run migrations first"))?;

        Ok(Self {
            pool,
            ingester,
            title_element_id,
        })
    }

    async fn resolve_item_type(&self, metadata: &RecordMetadata) -> Result<Option<i64>, RepositoryError> {
        match &metadata.item_type_name {
            Some(name) => match queries::find_item_type_id(&self.pool, name).await? {
                Some(id) => Ok(Some(id)),
                None => Err(RepositoryError::Validation(format!("unknown item type '{}'", name))),
            },
            None => Ok(metadata.item_type_id),
        }
    }

    async fn check_elements(&self, entries: &[ElementTextEntry]) -> Result<(), RepositoryError> {
        let mut ids: Vec<i64> = entries.iter().map(|e| e.element_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let unknown = queries::unknown_element_ids(&self.pool, &ids).await?;
        if !unknown.is_empty() {
            return Err(RepositoryError::Validation(format!("unknown element ids {:?}", unknown)));
        }
        Ok(())
    }

    /// Remove stored files no record points at anymore
    async fn unlink_unused(&self, paths: Vec<String>) -> Result<(), RepositoryError> {
        for path in paths {
            let in_use: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM records WHERE stored_path = $1)")
                .bind(&path)
                .fetch_one(&self.pool)
                .await?;
            if in_use.0 {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove stored file {}: {}", path, e);
                }
            }
        }
        Ok(())
    }
}

/// Foreign key violations are validation failures, anything else is fatal
fn classify(err: anyhow::Error) -> RepositoryError {
    if let Some(sqlx::Error::Database(db)) = err.downcast_ref::<sqlx::Error>() {
        if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return RepositoryError::Validation(db.message().to_string());
        }
    }
    RepositoryError::Other(err)
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_record(
        &self,
        metadata: &RecordMetadata,
        element_texts: &[ElementTextEntry],
    ) -> Result<Record, RepositoryError> {
        let item_type_id = self.resolve_item_type(metadata).await?;
        if let Some(collection_id) = metadata.collection_id {
            if !queries::collection_exists(&self.pool, collection_id).await? {
                return Err(RepositoryError::Validation(format!(
                    "collection {} does not exist",
                    collection_id
                )));
            }
        }
        self.check_elements(element_texts).await?;

        let item = queries::NewItem {
            item_type_id,
            collection_id: metadata.collection_id,
            is_public: metadata.public,
            is_featured: metadata.featured,
            extra: &metadata.extra,
        };
        queries::create_item(&self.pool, &item, element_texts)
            .await
            .map_err(classify)
    }

    async fn attach_file(
        &self,
        item: &Record,
        source: &FileSource,
        options: IngestOptions,
    ) -> Result<Option<Record>, RepositoryError> {
        if !item.supports_files() {
            return Err(RepositoryError::Validation(format!(
                "{} {} cannot own files",
                item.kind.as_str(),
                item.id
            )));
        }

        let stored = match self.ingester.ingest(source).await {
            Ok(stored) => stored,
            Err(reason) if options.fail_on_invalid => {
                return Err(RepositoryError::Ingest {
                    source_ref: source.as_str().to_string(),
                    reason,
                })
            }
            Err(reason) => {
                tracing::warn!("Ignoring invalid file '{}': {}", source.as_str(), reason);
                return Ok(None);
            }
        };

        tracing::debug!(
            "Stored {} ({} bytes) for item {}",
            stored.original_filename,
            stored.size,
            item.id
        );
        let file = queries::create_file(
            &self.pool,
            item.id,
            &stored.original_filename,
            &stored.stored_path.to_string_lossy(),
        )
        .await
        .map_err(classify)?;
        Ok(Some(file))
    }

    async fn delete_record(&self, record: &Record) -> Result<(), RepositoryError> {
        let paths = queries::file_paths_of(&self.pool, record.id).await?;
        queries::delete_record(&self.pool, record.id).await?;
        self.unlink_unused(paths).await
    }

    async fn find_records(&self, ids: &[i64]) -> Result<Vec<Record>, RepositoryError> {
        Ok(queries::find_records(&self.pool, ids).await?)
    }

    async fn find_record_by_filename(&self, filename: &str) -> Result<Option<Record>, RepositoryError> {
        Ok(queries::find_by_filename(&self.pool, Some(RecordKind::File), filename).await?)
    }

    async fn find_record_by_identifier(
        &self,
        kind: Option<RecordKind>,
        field: &IdentifierField,
        value: &str,
    ) -> Result<Option<Record>, RepositoryError> {
        let value = value.trim();
        let record = match field {
            IdentifierField::InternalId => match value.parse::<i64>() {
                Ok(id) => queries::find_by_id(&self.pool, kind, id).await?,
                Err(_) => None,
            },
            IdentifierField::OriginalFilename => queries::find_by_filename(&self.pool, kind, value).await?,
            IdentifierField::Element(element) => {
                let element_id = queries::find_element_id(&self.pool, &element.element_set, &element.name)
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::Validation(format!(
                            "unknown element '{}:{}'",
                            element.element_set, element.name
                        ))
                    })?;
                queries::find_by_element_text(&self.pool, kind, element_id, value).await?
            }
        };
        Ok(record)
    }

    async fn update_element_texts(
        &self,
        record: &Record,
        entries: &[ElementTextEntry],
        mode: UpdateMode,
    ) -> Result<(), RepositoryError> {
        self.check_elements(entries).await?;
        let replace = mode != UpdateMode::Add;
        queries::write_element_texts(&self.pool, record.id, entries, replace)
            .await
            .map_err(classify)
    }

    async fn set_file_order(&self, file: &Record, order: Option<i32>) -> Result<(), RepositoryError> {
        Ok(queries::set_file_order(&self.pool, file.id, order).await?)
    }

    async fn find_collection_by_title(&self, title: &str) -> Result<Option<Record>, RepositoryError> {
        Ok(queries::find_collection_by_title(&self.pool, self.title_element_id, title).await?)
    }

    async fn create_collection(&self, title: &str) -> Result<Record, RepositoryError> {
        Ok(queries::create_collection(&self.pool, self.title_element_id, title).await?)
    }
}
