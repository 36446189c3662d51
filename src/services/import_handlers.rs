//! Per-format row handlers
//!
//! Every handler receives the aggregated `RowResult` of one row and returns a
//! `RowOutcome`. `Skipped` is a row-level failure the loop counts and moves
//! past; an `Err` is fatal for the run (or a pause when it is `Interrupted`).

use crate::services::import_engine::ImportError;
use crate::services::import_log::ImportLog;
use crate::services::import_store::ImportStore;
use crate::services::repository::{FileSource, IngestOptions, Repository, RepositoryError};
use crate::types::{
    FileUrl, Import, ImportFormat, ImportedItem, Record, RecordKind, RecordMetadata, RowResult,
    UpdateMode,
};

/// Collaborators and settings a handler may use for one row
pub struct RowContext<'a> {
    pub import: &'a Import,
    pub repository: &'a dyn Repository,
    pub store: &'a dyn ImportStore,
    pub log: &'a ImportLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// New item created (ledger entry written)
    Imported(i64),
    /// Existing record updated by an Update row (ledger entry written)
    Updated(i64),
    /// Existing file's metadata overwritten
    FileUpdated(i64),
    /// Files attached to an item created earlier in the run
    FilesAttached(i64),
    /// Row produced no record
    Skipped(String),
}

/// Route one row to the handler for the import's declared format
pub async fn process_row(ctx: &RowContext<'_>, result: &RowResult) -> Result<RowOutcome, ImportError> {
    match ctx.import.format {
        ImportFormat::Item | ImportFormat::Report => add_item(ctx, result).await,
        ImportFormat::File => update_file_metadata(ctx, result).await,
        ImportFormat::Mix => {
            if result.file_urls.is_empty() {
                add_item(ctx, result).await
            } else {
                attach_files_to_source_item(ctx, result).await
            }
        }
        ImportFormat::Update => update_record(ctx, result).await,
    }
}

/// How item creation orders freshly attached files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreationFileOrder {
    /// Natural 1-based position in the file column
    Natural,
    Clear,
}

/// File-Order during item creation: absent leaves the repository default,
/// empty / `0` / `false` clears, anything else uses the natural position.
fn creation_file_order(raw: Option<&str>) -> Option<CreationFileOrder> {
    let raw = raw?.trim();
    if raw.is_empty() || raw == "0" || raw.eq_ignore_ascii_case("false") {
        Some(CreationFileOrder::Clear)
    } else {
        Some(CreationFileOrder::Natural)
    }
}

/// File-Order during metadata updates: absent leaves the order alone,
/// a non-zero number sets it, anything else clears it.
fn explicit_file_order(raw: Option<&str>) -> Option<Option<i32>> {
    let raw = raw?.trim();
    match raw.parse::<i32>() {
        Ok(order) if order != 0 => Some(Some(order)),
        _ => Some(None),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn attach(ctx: &RowContext<'_>, item: &Record, url: &FileUrl) -> Result<Option<Record>, RepositoryError> {
    let source = FileSource::classify(&url.source);
    ctx.repository
        .attach_file(item, &source, IngestOptions { fail_on_invalid: true })
        .await
}

/// Create one item from the row, attach its files, and record it in the ledger
pub async fn add_item(ctx: &RowContext<'_>, result: &RowResult) -> Result<RowOutcome, ImportError> {
    let import = ctx.import;
    let mut metadata = RecordMetadata {
        item_type_id: import.item_type_id,
        item_type_name: None,
        collection_id: import.collection_id,
        public: import.is_public,
        featured: import.is_featured,
        extra: result.plugin.clone(),
    };
    if let Some(collection_id) = result.collection_id {
        metadata.collection_id = Some(collection_id);
    }
    if let Some(public) = result.public {
        metadata.public = public;
    }
    if let Some(featured) = result.featured {
        metadata.featured = featured;
    }
    if let Some(name) = non_empty(&result.item_type_name) {
        metadata.item_type_name = Some(name.to_string());
    }

    let element_texts = result.non_empty_element_texts();
    let item = match ctx.repository.create_record(&metadata, &element_texts).await {
        Ok(item) => item,
        Err(RepositoryError::Validation(reason)) => {
            ctx.log.error(&format!("Item rejected by validation: {}", reason));
            return Ok(RowOutcome::Skipped(format!("validation failed: {}", reason)));
        }
        Err(e) => return Err(e.into()),
    };

    match finish_new_item(ctx, result, &item).await {
        Ok(None) => Ok(RowOutcome::Imported(item.id)),
        Ok(Some(reason)) => {
            ctx.repository.delete_record(&item).await?;
            Ok(RowOutcome::Skipped(reason))
        }
        Err(e) => {
            // No half-built item may outlive its row.
            if let Err(cleanup) = ctx.repository.delete_record(&item).await {
                ctx.log.error(&format!("Failed to remove partial item {}: {}", item.id, cleanup));
            }
            Err(e)
        }
    }
}

/// Attach files and write the ledger entry. `Ok(Some(reason))` means a file
/// failed to ingest and the item must be removed.
async fn finish_new_item(
    ctx: &RowContext<'_>,
    result: &RowResult,
    item: &Record,
) -> Result<Option<String>, ImportError> {
    let order_rule = creation_file_order(result.file_order.as_deref());
    for url in &result.file_urls {
        match attach(ctx, item, url).await {
            Ok(Some(file)) => match order_rule {
                Some(CreationFileOrder::Natural) => {
                    ctx.repository.set_file_order(&file, Some(url.order as i32)).await?
                }
                Some(CreationFileOrder::Clear) => ctx.repository.set_file_order(&file, None).await?,
                None => {}
            },
            Ok(None) => {}
            Err(RepositoryError::Ingest { source_ref, reason }) => {
                ctx.log.info(&format!(
                    "Error occurred when attempting to ingest the following URL as a file: '{}': {}",
                    source_ref, reason
                ));
                return Ok(Some(format!("file '{}' could not be ingested", url.source)));
            }
            Err(e) => return Err(e.into()),
        }
    }

    ctx.store
        .record_imported_item(&ImportedItem {
            import_id: ctx.import.id,
            item_id: item.id,
            source_item_id: result.source_item_id.clone(),
        })
        .await?;
    Ok(None)
}

/// Overwrite metadata of a file that an earlier import already ingested
pub async fn update_file_metadata(ctx: &RowContext<'_>, result: &RowResult) -> Result<RowOutcome, ImportError> {
    let filename = match non_empty(&result.filename) {
        Some(name) => name,
        None => return Ok(RowOutcome::Skipped("row has no filename".to_string())),
    };
    let file = match ctx.repository.find_record_by_filename(filename).await? {
        Some(file) => file,
        None => {
            return Ok(RowOutcome::Skipped(format!(
                "File \"{}\" does not exist. Add items first before importing file metadata.",
                filename
            )))
        }
    };

    let element_texts = result.non_empty_element_texts();
    if !element_texts.is_empty() {
        ctx.repository
            .update_element_texts(&file, &element_texts, UpdateMode::Replace)
            .await?;
    }
    if let Some(order) = explicit_file_order(result.file_order.as_deref()) {
        ctx.repository.set_file_order(&file, order).await?;
    }
    Ok(RowOutcome::FileUpdated(file.id))
}

/// Mix row with file URLs: attach them to the item an earlier row of this
/// import created under the same source item id
pub async fn attach_files_to_source_item(
    ctx: &RowContext<'_>,
    result: &RowResult,
) -> Result<RowOutcome, ImportError> {
    let source_item_id = match non_empty(&result.source_item_id) {
        Some(id) => id,
        None => return Ok(RowOutcome::Skipped("file row has no source item id".to_string())),
    };
    let entry = match ctx
        .store
        .find_imported_item_by_source_id(ctx.import.id, source_item_id)
        .await?
    {
        Some(entry) => entry,
        None => {
            return Ok(RowOutcome::Skipped(format!(
                "no item imported with source id '{}'",
                source_item_id
            )))
        }
    };
    let item = match ctx.repository.find_records(&[entry.item_id]).await?.into_iter().next() {
        Some(item) => item,
        None => {
            return Ok(RowOutcome::Skipped(format!(
                "item {} for source id '{}' no longer exists",
                entry.item_id, source_item_id
            )))
        }
    };

    let element_texts = result.non_empty_element_texts();
    let order = explicit_file_order(result.file_order.as_deref());
    for url in &result.file_urls {
        match attach(ctx, &item, url).await {
            Ok(Some(file)) => {
                if !element_texts.is_empty() {
                    ctx.repository
                        .update_element_texts(&file, &element_texts, UpdateMode::Replace)
                        .await?;
                }
                if let Some(order) = order {
                    ctx.repository.set_file_order(&file, order).await?;
                }
            }
            Ok(None) => {}
            Err(RepositoryError::Ingest { source_ref, reason }) => {
                ctx.log.info(&format!("Could not ingest '{}' for item {}: {}", source_ref, item.id, reason));
                return Ok(RowOutcome::Skipped(format!("file '{}' could not be ingested", url.source)));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(RowOutcome::FilesAttached(item.id))
}

/// Locate an existing record and apply the row's element texts and files
pub async fn update_record(ctx: &RowContext<'_>, result: &RowResult) -> Result<RowOutcome, ImportError> {
    let settings = &ctx.import.update;
    let identifier = match non_empty(&result.update_identifier) {
        Some(value) => value,
        None => return Ok(RowOutcome::Skipped("row has no update identifier".to_string())),
    };
    let mode = match non_empty(&result.update_mode) {
        Some(raw) => match UpdateMode::parse(raw) {
            Some(mode) => mode,
            None => return Ok(RowOutcome::Skipped(format!("unknown update mode '{}'", raw))),
        },
        None => settings.mode,
    };
    let kind = match non_empty(&result.record_type) {
        Some(raw) => match RecordKind::parse(raw) {
            Some(kind) => Some(kind),
            None => return Ok(RowOutcome::Skipped(format!("unknown record type '{}'", raw))),
        },
        None => settings.record_type,
    };

    let target = match ctx
        .repository
        .find_record_by_identifier(kind, &settings.identifier, identifier)
        .await?
    {
        Some(record) => record,
        None => {
            return Ok(RowOutcome::Skipped(format!(
                "no record with {} = '{}'",
                settings.identifier.to_setting(),
                identifier
            )))
        }
    };

    let entries = match mode {
        UpdateMode::Add | UpdateMode::Replace => result.non_empty_element_texts(),
        UpdateMode::ReplaceAll => result.element_texts.clone(),
    };
    if !entries.is_empty() {
        ctx.repository.update_element_texts(&target, &entries, mode).await?;
    }

    if target.supports_files() {
        for url in &result.file_urls {
            match attach(ctx, &target, url).await {
                Ok(_) => {}
                Err(RepositoryError::Ingest { source_ref, reason }) => {
                    // The record existed before this import; keep it.
                    ctx.log.info(&format!(
                        "Could not ingest '{}' for record {}: {}",
                        source_ref, target.id, reason
                    ));
                    return Ok(RowOutcome::Skipped(format!("file '{}' could not be ingested", url.source)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    ctx.store
        .record_imported_item(&ImportedItem {
            import_id: ctx.import.id,
            item_id: target.id,
            source_item_id: result.source_item_id.clone(),
        })
        .await?;
    Ok(RowOutcome::Updated(target.id))
}
