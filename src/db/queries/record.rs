//! Content repository queries (records, element texts, collections)

use anyhow::{anyhow, Result};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::types::{ElementTextEntry, Record, RecordKind};

const RECORD_COLUMNS: &str = r#"
    id, kind, item_id, original_filename, file_order
"#;

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: i64,
    kind: String,
    item_id: Option<i64>,
    original_filename: Option<String>,
    file_order: Option<i32>,
}

impl TryFrom<RecordRow> for Record {
    type Error = anyhow::Error;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(Record {
            id: row.id,
            kind: RecordKind::parse(&row.kind).ok_or_else(|| anyhow!("unknown record kind '{}'", row.kind))?,
            item_id: row.item_id,
            original_filename: row.original_filename,
            file_order: row.file_order,
        })
    }
}

/// Fields of a new item row
pub struct NewItem<'a> {
    pub item_type_id: Option<i64>,
    pub collection_id: Option<i64>,
    pub is_public: bool,
    pub is_featured: bool,
    pub extra: &'a [serde_json::Value],
}

/// Insert an item and its element texts in one transaction
pub async fn create_item(pool: &PgPool, item: &NewItem<'_>, texts: &[ElementTextEntry]) -> Result<Record> {
    let mut tx = pool.begin().await?;

    let query = format!(
        r#"
        INSERT INTO records (kind, item_type_id, collection_id, is_public, is_featured, extra)
        VALUES ('item', $1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .bind(item.item_type_id)
        .bind(item.collection_id)
        .bind(item.is_public)
        .bind(item.is_featured)
        .bind(Json(item.extra))
        .fetch_one(&mut *tx)
        .await?;

    insert_element_texts(&mut tx, row.id, texts).await?;
    tx.commit().await?;

    Record::try_from(row)
}

/// Insert a file record owned by `item_id`
pub async fn create_file(pool: &PgPool, item_id: i64, original_filename: &str, stored_path: &str) -> Result<Record> {
    let query = format!(
        r#"
        INSERT INTO records (kind, item_id, original_filename, stored_path)
        VALUES ('file', $1, $2, $3)
        RETURNING {}
        "#,
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .bind(item_id)
        .bind(original_filename)
        .bind(stored_path)
        .fetch_one(pool)
        .await?;

    Record::try_from(row)
}

/// Create a private, unfeatured collection with a Title text
pub async fn create_collection(pool: &PgPool, title_element_id: i64, title: &str) -> Result<Record> {
    let mut tx = pool.begin().await?;

    let query = format!(
        "INSERT INTO records (kind, is_public, is_featured) VALUES ('collection', FALSE, FALSE) RETURNING {}",
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .fetch_one(&mut *tx)
        .await?;

    let title = ElementTextEntry {
        element_id: title_element_id,
        text: title.to_string(),
        html: false,
    };
    insert_element_texts(&mut tx, row.id, std::slice::from_ref(&title)).await?;
    tx.commit().await?;

    Record::try_from(row)
}

/// Delete a record; files and element texts cascade
pub async fn delete_record(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM records WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stored paths of the files owned by `item_id`
pub async fn file_paths_of(pool: &PgPool, item_id: i64) -> Result<Vec<String>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as(
        "SELECT stored_path FROM records WHERE item_id = $1 OR (id = $1 AND kind = 'file')",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|(path,)| path).collect())
}

pub async fn find_records(pool: &PgPool, ids: &[i64]) -> Result<Vec<Record>> {
    let query = format!("SELECT {} FROM records WHERE id = ANY($1) ORDER BY id", RECORD_COLUMNS);
    let rows = sqlx::query_as::<_, RecordRow>(&query)
        .bind(ids)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Record::try_from).collect()
}

/// First record with `original_filename`, optionally limited to one kind
pub async fn find_by_filename(pool: &PgPool, kind: Option<RecordKind>, filename: &str) -> Result<Option<Record>> {
    let query = format!(
        r#"
        SELECT {} FROM records
        WHERE original_filename = $1 AND ($2::TEXT IS NULL OR kind = $2)
        ORDER BY id
        LIMIT 1
        "#,
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .bind(filename)
        .bind(kind.map(|k| k.as_str()))
        .fetch_optional(pool)
        .await?;

    row.map(Record::try_from).transpose()
}

pub async fn find_by_id(pool: &PgPool, kind: Option<RecordKind>, id: i64) -> Result<Option<Record>> {
    let query = format!(
        "SELECT {} FROM records WHERE id = $1 AND ($2::TEXT IS NULL OR kind = $2)",
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .bind(id)
        .bind(kind.map(|k| k.as_str()))
        .fetch_optional(pool)
        .await?;

    row.map(Record::try_from).transpose()
}

/// First record holding `text` exactly under `element_id`
pub async fn find_by_element_text(
    pool: &PgPool,
    kind: Option<RecordKind>,
    element_id: i64,
    text: &str,
) -> Result<Option<Record>> {
    let query = format!(
        r#"
        SELECT {} FROM records
        WHERE id = (
            SELECT MIN(et.record_id) FROM element_texts et
            JOIN records r ON r.id = et.record_id
            WHERE et.element_id = $1 AND et.text = $2
              AND ($3::TEXT IS NULL OR r.kind = $3)
        )
        "#,
        RECORD_COLUMNS
    );
    let row = sqlx::query_as::<_, RecordRow>(&query)
        .bind(element_id)
        .bind(text)
        .bind(kind.map(|k| k.as_str()))
        .fetch_optional(pool)
        .await?;

    row.map(Record::try_from).transpose()
}

pub async fn find_element_id(pool: &PgPool, element_set: &str, name: &str) -> Result<Option<i64>> {
    let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM elements WHERE element_set = $1 AND name = $2")
        .bind(element_set)
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(id.map(|(id,)| id))
}

/// Element ids among `ids` that do not exist
pub async fn unknown_element_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<i64>> {
    let known: Vec<(i64,)> = sqlx::query_as("SELECT id FROM elements WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await?;

    Ok(ids
        .iter()
        .copied()
        .filter(|id| !known.iter().any(|(k,)| k == id))
        .collect())
}

pub async fn find_item_type_id(pool: &PgPool, name: &str) -> Result<Option<i64>> {
    let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM item_types WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(id.map(|(id,)| id))
}

pub async fn collection_exists(pool: &PgPool, id: i64) -> Result<bool> {
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM records WHERE id = $1 AND kind = 'collection')")
        .bind(id)
        .fetch_one(pool)
        .await?;

    Ok(exists.0)
}

/// Collection whose title matches `title` case-sensitively
pub async fn find_collection_by_title(pool: &PgPool, title_element_id: i64, title: &str) -> Result<Option<Record>> {
    find_by_element_text(pool, Some(RecordKind::Collection), title_element_id, title).await
}

/// Write element texts; with `replace` the existing values of the same
/// element ids are removed first. Empty entries are never stored.
pub async fn write_element_texts(pool: &PgPool, record_id: i64, entries: &[ElementTextEntry], replace: bool) -> Result<()> {
    let mut tx = pool.begin().await?;

    if replace {
        let element_ids: Vec<i64> = entries.iter().map(|e| e.element_id).collect();
        sqlx::query("DELETE FROM element_texts WHERE record_id = $1 AND element_id = ANY($2)")
            .bind(record_id)
            .bind(&element_ids)
            .execute(&mut *tx)
            .await?;
    }
    insert_element_texts(&mut tx, record_id, entries).await?;

    sqlx::query("UPDATE records SET updated_at = NOW() WHERE id = $1")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

async fn insert_element_texts(
    tx: &mut Transaction<'_, Postgres>,
    record_id: i64,
    entries: &[ElementTextEntry],
) -> Result<()> {
    for entry in entries.iter().filter(|e| !e.is_empty()) {
        sqlx::query("INSERT INTO element_texts (record_id, element_id, text, html) VALUES ($1, $2, $3, $4)")
            .bind(record_id)
            .bind(entry.element_id)
            .bind(&entry.text)
            .bind(entry.html)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

pub async fn set_file_order(pool: &PgPool, file_id: i64, order: Option<i32>) -> Result<()> {
    sqlx::query("UPDATE records SET file_order = $2, updated_at = NOW() WHERE id = $1 AND kind = 'file'")
        .bind(file_id)
        .bind(order)
        .execute(pool)
        .await?;

    Ok(())
}
