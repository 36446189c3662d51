//! Import run and ledger queries

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{
    ColumnMapSet, IdentifierField, Import, ImportFormat, ImportStatus, ImportedItem, RecordKind,
    RowCursor, UpdateMode, UpdateSettings,
};

const IMPORT_COLUMNS: &str = r#"
    id, original_filename, file_path, delimiter, enclosure, format,
    item_type_id, collection_id, is_public, is_featured,
    update_identifier, update_mode, update_record_type,
    row_count, skipped_row_count, skipped_item_count,
    file_position, status, column_maps, created_at
"#;

/// `csv_imports` row as stored
#[derive(Debug, sqlx::FromRow)]
struct ImportRow {
    id: Uuid,
    original_filename: String,
    file_path: String,
    delimiter: String,
    enclosure: String,
    format: String,
    item_type_id: Option<i64>,
    collection_id: Option<i64>,
    is_public: bool,
    is_featured: bool,
    update_identifier: String,
    update_mode: String,
    update_record_type: Option<String>,
    row_count: i64,
    skipped_row_count: i64,
    skipped_item_count: i64,
    file_position: Json<RowCursor>,
    status: Option<String>,
    column_maps: Json<ColumnMapSet>,
    created_at: DateTime<Utc>,
}

fn single_char(value: &str, column: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(anyhow!("csv_imports.{} must hold one character, got '{}'", column, value)),
    }
}

impl TryFrom<ImportRow> for Import {
    type Error = anyhow::Error;

    fn try_from(row: ImportRow) -> Result<Self> {
        let format = ImportFormat::parse(&row.format)
            .ok_or_else(|| anyhow!("unknown import format '{}'", row.format))?;
        let status = match row.status.as_deref() {
            Some(s) => Some(ImportStatus::parse(s).ok_or_else(|| anyhow!("unknown import status '{}'", s))?),
            None => None,
        };
        let identifier = IdentifierField::parse(&row.update_identifier)
            .ok_or_else(|| anyhow!("invalid update identifier '{}'", row.update_identifier))?;
        let mode = UpdateMode::parse(&row.update_mode)
            .ok_or_else(|| anyhow!("invalid update mode '{}'", row.update_mode))?;
        let record_type = row.update_record_type.as_deref().and_then(RecordKind::parse);

        Ok(Import {
            id: row.id,
            original_filename: row.original_filename,
            file_path: row.file_path,
            delimiter: single_char(&row.delimiter, "delimiter")?,
            enclosure: single_char(&row.enclosure, "enclosure")?,
            format,
            item_type_id: row.item_type_id,
            collection_id: row.collection_id,
            is_public: row.is_public,
            is_featured: row.is_featured,
            update: UpdateSettings { identifier, mode, record_type },
            row_count: row.row_count,
            skipped_row_count: row.skipped_row_count,
            skipped_item_count: row.skipped_item_count,
            file_position: row.file_position.0,
            status,
            column_maps: row.column_maps.0,
            created_at: row.created_at,
        })
    }
}

fn into_imports(rows: Vec<ImportRow>) -> Result<Vec<Import>> {
    rows.into_iter().map(Import::try_from).collect()
}

/// Insert a new import
pub async fn insert_import(pool: &PgPool, import: &Import) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO csv_imports (
            id, original_filename, file_path, delimiter, enclosure, format,
            item_type_id, collection_id, is_public, is_featured,
            update_identifier, update_mode, update_record_type,
            row_count, skipped_row_count, skipped_item_count,
            file_position, status, column_maps, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        "#,
    )
    .bind(import.id)
    .bind(&import.original_filename)
    .bind(&import.file_path)
    .bind(import.delimiter.to_string())
    .bind(import.enclosure.to_string())
    .bind(import.format.as_str())
    .bind(import.item_type_id)
    .bind(import.collection_id)
    .bind(import.is_public)
    .bind(import.is_featured)
    .bind(import.update.identifier.to_setting())
    .bind(import.update.mode.as_str())
    .bind(import.update.record_type.map(|k| k.as_str()))
    .bind(import.row_count)
    .bind(import.skipped_row_count)
    .bind(import.skipped_item_count)
    .bind(Json(import.file_position))
    .bind(import.status.map(|s| s.as_str()))
    .bind(Json(&import.column_maps))
    .bind(import.created_at)
    .execute(pool)
    .await
    .context("Failed to insert import")?;

    Ok(())
}

/// Persist the mutable run state of an import
pub async fn update_import(pool: &PgPool, import: &Import) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE csv_imports
        SET status = $2,
            row_count = $3,
            skipped_row_count = $4,
            skipped_item_count = $5,
            file_position = $6,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(import.id)
    .bind(import.status.map(|s| s.as_str()))
    .bind(import.row_count)
    .bind(import.skipped_row_count)
    .bind(import.skipped_item_count)
    .bind(Json(import.file_position))
    .execute(pool)
    .await
    .context("Failed to update import")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("import {} no longer exists", import.id));
    }
    Ok(())
}

pub async fn get_import(pool: &PgPool, id: Uuid) -> Result<Option<Import>> {
    let query = format!("SELECT {} FROM csv_imports WHERE id = $1", IMPORT_COLUMNS);
    let row = sqlx::query_as::<_, ImportRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Import::try_from).transpose()
}

/// All imports, newest first
pub async fn list_imports(pool: &PgPool) -> Result<Vec<Import>> {
    let query = format!("SELECT {} FROM csv_imports ORDER BY created_at DESC", IMPORT_COLUMNS);
    let rows = sqlx::query_as::<_, ImportRow>(&query)
        .fetch_all(pool)
        .await?;

    into_imports(rows)
}

/// Oldest import waiting to be resumed
pub async fn next_queued_import(pool: &PgPool) -> Result<Option<Import>> {
    let query = format!(
        "SELECT {} FROM csv_imports WHERE status IN ('queued', 'queued_undo') ORDER BY created_at LIMIT 1",
        IMPORT_COLUMNS
    );
    let row = sqlx::query_as::<_, ImportRow>(&query)
        .fetch_optional(pool)
        .await?;

    row.map(Import::try_from).transpose()
}

/// Delete an import; ledger rows go with it
pub async fn delete_import(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM csv_imports WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Move every run left in progress to `stopped`
pub async fn mark_running_stopped(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE csv_imports
        SET status = 'stopped', updated_at = NOW()
        WHERE status IN ('in_progress', 'in_progress_undo')
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// LEDGER
// =============================================================================

pub async fn insert_imported_item(pool: &PgPool, entry: &ImportedItem) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO csv_imported_items (import_id, item_id, source_item_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (import_id, item_id) DO NOTHING
        "#,
    )
    .bind(entry.import_id)
    .bind(entry.item_id)
    .bind(&entry.source_item_id)
    .execute(pool)
    .await
    .context("Failed to record imported item")?;

    Ok(())
}

pub async fn find_imported_item_by_source_id(
    pool: &PgPool,
    import_id: Uuid,
    source_item_id: &str,
) -> Result<Option<ImportedItem>> {
    let row: Option<(i64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT item_id, source_item_id FROM csv_imported_items
        WHERE import_id = $1 AND source_item_id = $2
        ORDER BY id
        LIMIT 1
        "#,
    )
    .bind(import_id)
    .bind(source_item_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(item_id, source_item_id)| ImportedItem { import_id, item_id, source_item_id }))
}

/// Most recent ledger entries first
pub async fn imported_items_page(pool: &PgPool, import_id: Uuid, limit: i64) -> Result<Vec<ImportedItem>> {
    let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT item_id, source_item_id FROM csv_imported_items
        WHERE import_id = $1
        ORDER BY id DESC
        LIMIT $2
        "#,
    )
    .bind(import_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(item_id, source_item_id)| ImportedItem { import_id, item_id, source_item_id })
        .collect())
}

pub async fn delete_imported_items(pool: &PgPool, import_id: Uuid, item_ids: &[i64]) -> Result<u64> {
    let result = sqlx::query("DELETE FROM csv_imported_items WHERE import_id = $1 AND item_id = ANY($2)")
        .bind(import_id)
        .bind(item_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn count_imported_items(pool: &PgPool, import_id: Uuid) -> Result<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM csv_imported_items WHERE import_id = $1")
        .bind(import_id)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}
