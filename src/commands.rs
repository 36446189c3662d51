//! Subcommand implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cli::CreateArgs;
use crate::services::import_engine::ImportEngine;
use crate::services::interruption::INTERRUPTS;
use crate::services::row_source;
use crate::types::{ColumnMapSet, IdentifierField, Import, ImportSettings, RunOutcome, UpdateSettings};

/// Read a column map file. Accepts a versioned `{"version", "maps"}` object
/// or a bare array of maps; tag maps without a delimiter get `tag_delimiter`.
pub fn load_column_maps(path: &Path, tag_delimiter: &str) -> Result<ColumnMapSet> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read column maps from {}", path.display()))?;
    parse_column_maps(&raw, tag_delimiter)
}

fn parse_column_maps(raw: &str, tag_delimiter: &str) -> Result<ColumnMapSet> {
    let mut value: Value = serde_json::from_str(raw).context("Column maps are not valid JSON")?;
    if value.is_array() {
        value = serde_json::json!({ "version": crate::types::COLUMN_MAP_SCHEMA_VERSION, "maps": value });
    }
    if let Some(maps) = value.get_mut("maps").and_then(Value::as_array_mut) {
        for map in maps.iter_mut().filter_map(Value::as_object_mut) {
            let is_tag = map.get("kind").and_then(Value::as_str) == Some("tag");
            if is_tag && !map.contains_key("delimiter") {
                map.insert("delimiter".to_string(), Value::String(tag_delimiter.to_string()));
            }
        }
    }
    serde_json::from_value(value).context("Column maps do not match the expected schema")
}

pub async fn create(engine: &ImportEngine, args: CreateArgs, tag_delimiter: &str) -> Result<()> {
    let column_maps = load_column_maps(&args.maps, tag_delimiter)?;
    let identifier = IdentifierField::parse(&args.update_identifier)
        .with_context(|| format!("Invalid update identifier '{}'", args.update_identifier))?;

    let settings = ImportSettings {
        source_path: args.file.to_string_lossy().into_owned(),
        original_filename: args.name,
        delimiter: args.delimiter,
        enclosure: args.enclosure,
        format: args.format,
        item_type_id: args.item_type_id,
        collection_id: args.collection_id,
        is_public: args.public,
        is_featured: args.featured,
        update: UpdateSettings {
            identifier,
            mode: args.update_mode,
            record_type: args.record_type,
        },
        column_maps,
    };
    let import = engine.create(settings).await?;
    println!("{}", import.id);
    Ok(())
}

pub fn preview(file: &Path, delimiter: char, enclosure: char) -> Result<()> {
    let preview = row_source::preview(file, delimiter, enclosure)
        .with_context(|| format!("Failed to preview {}", file.display()))?;
    for (index, header) in preview.headers.iter().enumerate() {
        let example = preview.examples.get(index).map(String::as_str).unwrap_or("");
        println!("{:>3}  {:<30} {}", index, header, example);
    }
    Ok(())
}

pub async fn start(engine: &ImportEngine, id: Uuid) -> Result<()> {
    let mut import = engine.load(id).await?;
    let outcome = engine.start(&mut import).await?;
    report(&import, outcome);
    Ok(())
}

pub async fn resume(engine: &ImportEngine, id: Uuid) -> Result<()> {
    let mut import = engine.load(id).await?;
    let outcome = engine.resume(&mut import).await?;
    report(&import, outcome);
    Ok(())
}

pub async fn undo(engine: &ImportEngine, id: Uuid) -> Result<()> {
    let mut import = engine.load(id).await?;
    let outcome = engine.undo(&mut import).await?;
    report(&import, outcome);
    Ok(())
}

pub async fn status(engine: &ImportEngine, id: Uuid) -> Result<()> {
    let import = engine.load(id).await?;
    let progress = engine.progress(&import).await?;
    println!("{}", describe(&import));
    println!("  rows: {}  position: line {}", import.row_count, import.file_position.line);
    println!("  {}", progress);
    Ok(())
}

pub async fn list(engine: &ImportEngine) -> Result<()> {
    for import in engine.store().list_imports().await? {
        println!("{}", describe(&import));
    }
    Ok(())
}

pub async fn delete(engine: &ImportEngine, id: Uuid) -> Result<()> {
    let import = engine.load(id).await?;
    engine.delete(&import).await?;
    println!("Deleted {}", id);
    Ok(())
}

/// On Ctrl-C, interrupt every running import and fire the returned token
pub fn watch_for_shutdown() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let interrupted = INTERRUPTS.interrupt_all();
            info!("Shutdown requested, interrupting {} running import(s)", interrupted);
            signal.cancel();
        }
    });
    shutdown
}

fn describe(import: &Import) -> String {
    format!(
        "{}  {:<16} {:<7} {}  ({})",
        import.id,
        import.status_name(),
        import.format.as_str(),
        import.original_filename,
        import.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn report(import: &Import, outcome: RunOutcome) {
    match outcome {
        RunOutcome::Completed { imported } => println!("{} completed: {} records", import.id, imported),
        RunOutcome::Queued { position } => {
            println!("{} queued at row {} (line {})", import.id, position.row, position.line)
        }
        RunOutcome::UndoCompleted { deleted } => println!("{} undone: {} records deleted", import.id, deleted),
        RunOutcome::UndoQueued { deleted } => {
            println!("{} undo queued after deleting {} records", import.id, deleted)
        }
    }
}

/// Interrupt `import_id` once `limit` has passed. Abort the handle when the run ends.
fn spawn_run_deadline(engine: Arc<ImportEngine>, import_id: Uuid, limit: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        if engine.interrupt(&import_id) {
            info!(import_id = %import_id, "Run time limit of {:?} reached, pausing", limit);
        }
    })
}

/// Resume queued imports and undos until `shutdown` fires. With `max_run_time`
/// set, each run is interrupted (and so re-queued) when it takes longer.
pub async fn serve(
    engine: Arc<ImportEngine>,
    poll_interval: Duration,
    max_run_time: Option<Duration>,
    shutdown: CancellationToken,
) -> Result<()> {
    let stopped = engine.store().mark_abandoned_runs_stopped().await?;
    if stopped > 0 {
        warn!("Marked {} import(s) left running by a previous process as stopped", stopped);
    }

    info!("Polling for queued imports every {:?}", poll_interval);
    while !shutdown.is_cancelled() {
        match engine.store().next_queued_import().await {
            Ok(Some(mut import)) => {
                info!(import_id = %import.id, "Resuming {} import", import.status_name());
                let deadline = max_run_time.map(|limit| spawn_run_deadline(engine.clone(), import.id, limit));
                let result = engine.resume(&mut import).await;
                if let Some(deadline) = deadline {
                    deadline.abort();
                }
                match result {
                    Ok(outcome) => {
                        report(&import, outcome);
                        continue;
                    }
                    Err(e) => error!(import_id = %import.id, "Import run failed: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to poll queued imports: {:#}", e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!("Worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnMap;

    #[test]
    fn test_bare_array_gets_current_version() {
        let set = parse_column_maps(r#"[{"kind": "file", "column": 2}]"#, ",").unwrap();
        assert_eq!(set.version, crate::types::COLUMN_MAP_SCHEMA_VERSION);
        assert_eq!(set.maps.len(), 1);
    }

    #[test]
    fn test_tag_delimiter_default_is_applied() {
        let raw = r#"{"version": 1, "maps": [
            {"kind": "tag", "column": "Collection"},
            {"kind": "tag", "column": "Series", "delimiter": "|"}
        ]}"#;
        let set = parse_column_maps(raw, ";").unwrap();

        let delimiters: Vec<&str> = set
            .maps
            .iter()
            .filter_map(|m| match m {
                ColumnMap::Tag { delimiter, .. } => Some(delimiter.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(delimiters, vec![";", "|"]);
    }

    #[tokio::test]
    async fn serve_drains_queue_and_stops_abandoned_runs() {
        use std::io::Write;

        use crate::services::import_store::ImportStore;
        use crate::services::interruption::InterruptRegistry;
        use crate::testing::{MemoryImportStore, MemoryRepository, DC_TITLE};
        use crate::types::{ColumnRef, ImportFormat, ImportStatus, RowCursor};

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"title\nA\nB\nC\n").unwrap();
        file.flush().unwrap();

        let store = Arc::new(MemoryImportStore::new());
        let repo = Arc::new(MemoryRepository::new());
        let engine = Arc::new(
            ImportEngine::new(store.clone(), repo.clone(), InterruptRegistry::default()).with_batch_size(2),
        );

        let queued = Import {
            id: Uuid::new_v4(),
            original_filename: "a.csv".to_string(),
            file_path: file.path().to_string_lossy().into_owned(),
            delimiter: ',',
            enclosure: '"',
            format: ImportFormat::Item,
            item_type_id: None,
            collection_id: None,
            is_public: false,
            is_featured: false,
            update: UpdateSettings::default(),
            row_count: 3,
            skipped_row_count: 0,
            skipped_item_count: 0,
            file_position: RowCursor::default(),
            status: Some(ImportStatus::Queued),
            column_maps: ColumnMapSet::new(vec![ColumnMap::Element {
                column: ColumnRef::Name("title".to_string()),
                element_id: DC_TITLE,
                html: false,
            }]),
            created_at: chrono::Utc::now(),
        };
        let abandoned = Import {
            id: Uuid::new_v4(),
            status: Some(ImportStatus::InProgress),
            ..queued.clone()
        };
        store.insert_import(&queued).await.unwrap();
        store.insert_import(&abandoned).await.unwrap();

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(serve(engine, Duration::from_secs(60), None, shutdown.clone()));
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.stored(queued.id).unwrap().status == Some(ImportStatus::Completed) {
                break;
            }
        }
        shutdown.cancel();
        worker.await.unwrap().unwrap();

        assert_eq!(store.stored(queued.id).unwrap().status, Some(ImportStatus::Completed));
        assert_eq!(store.stored(abandoned.id).unwrap().status, Some(ImportStatus::Stopped));
        assert_eq!(repo.item_count(), 3);
    }

    #[tokio::test]
    async fn run_deadline_interrupts_the_run() {
        use crate::services::interruption::InterruptRegistry;
        use crate::testing::{MemoryImportStore, MemoryRepository};

        let interrupts = InterruptRegistry::default();
        let engine = Arc::new(ImportEngine::new(
            Arc::new(MemoryImportStore::new()),
            Arc::new(MemoryRepository::new()),
            interrupts.clone(),
        ));
        let import_id = Uuid::new_v4();
        let guard = interrupts.register(import_id);

        spawn_run_deadline(engine, import_id, Duration::from_millis(5)).await.unwrap();

        assert!(guard.is_interrupted());
    }

    #[test]
    fn test_unknown_map_kind_is_rejected() {
        assert!(parse_column_maps(r#"[{"kind": "geolocation", "column": 0}]"#, ",").is_err());
    }
}
