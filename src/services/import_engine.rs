//! Import run controller
//!
//! Drives one import through its status machine:
//!
//! ```text
//! (none) -start-> in_progress -> completed
//!                     |  ^
//!                 queue  resume
//!                     v  |
//!                   queued
//! (started, idle, not error) -undo-> in_progress_undo -> completed_undo
//!                                         |  ^
//!                                 queue_undo  resume
//!                                         v  |
//!                                     queued_undo
//! ```
//!
//! A fatal failure ends in `import_error`/`undo_import_error`, an abnormal end
//! of the run (panic, dead process) in `stopped`. Every status change and the
//! row position after each processed row are persisted right away.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use crate::services::import_handlers::{self, RowContext, RowOutcome};
use crate::services::import_log::ImportLog;
use crate::services::import_store::ImportStore;
use crate::services::interruption::{InterruptRegistry, RunGuard};
use crate::services::repository::{Repository, RepositoryError};
use crate::services::row_source::{RowSource, RowSourceError};
use crate::types::{
    Import, ImportFormat, ImportProgress, ImportSettings, ImportStatus, RowCursor, RunOutcome,
};

/// Ledger rows fetched per undo page
const UNDO_PAGE_SIZE: u32 = 50;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("cannot {operation} an import in status '{status}'")]
    InvalidTransition {
        operation: &'static str,
        status: &'static str,
    },

    #[error("import {0} not found")]
    NotFound(Uuid),

    #[error("invalid import configuration: {0}")]
    InvalidConfig(String),

    #[error("row source error: {0}")]
    RowSource(#[from] RowSourceError),

    #[error("repository error: {0}")]
    Repository(RepositoryError),

    #[error("storage error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("import interrupted")]
    Interrupted,

    #[error("import run panicked: {0}")]
    Panicked(String),
}

impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Interrupted => ImportError::Interrupted,
            other => ImportError::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Import,
    Undo,
}

/// Runs imports against a repository and persists their state in a store
pub struct ImportEngine {
    store: Arc<dyn ImportStore>,
    repository: Arc<dyn Repository>,
    interrupts: InterruptRegistry,
    batch_size: u32,
    storage_dir: PathBuf,
}

impl ImportEngine {
    pub fn new(
        store: Arc<dyn ImportStore>,
        repository: Arc<dyn Repository>,
        interrupts: InterruptRegistry,
    ) -> Self {
        Self {
            store,
            repository,
            interrupts,
            batch_size: 0,
            storage_dir: PathBuf::from("./storage"),
        }
    }

    /// Pause to `queued` after every `batch_size` rows; 0 disables batching
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Directory that receives a private copy of every import file
    pub fn with_storage_dir(mut self, storage_dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = storage_dir.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn ImportStore> {
        &self.store
    }

    pub async fn load(&self, id: Uuid) -> Result<Import, ImportError> {
        self.store
            .find_import(id)
            .await?
            .ok_or(ImportError::NotFound(id))
    }

    /// Validate settings, copy the CSV into storage and persist a new import
    pub async fn create(&self, settings: ImportSettings) -> Result<Import, ImportError> {
        validate_settings(&settings)?;

        let id = Uuid::new_v4();
        let imports_dir = self.storage_dir.join("imports");
        tokio::fs::create_dir_all(&imports_dir)
            .await
            .with_context(|| format!("Failed to create {}", imports_dir.display()))?;
        let file_path = imports_dir.join(format!("{}.csv", id));
        tokio::fs::copy(&settings.source_path, &file_path)
            .await
            .with_context(|| format!("Failed to copy import file {}", settings.source_path))?;

        let original_filename = settings.original_filename.clone().unwrap_or_else(|| {
            Path::new(&settings.source_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| settings.source_path.clone())
        });

        let import = Import {
            id,
            original_filename,
            file_path: file_path.to_string_lossy().into_owned(),
            delimiter: settings.delimiter,
            enclosure: settings.enclosure,
            format: settings.format,
            item_type_id: settings.item_type_id,
            collection_id: settings.collection_id,
            is_public: settings.is_public,
            is_featured: settings.is_featured,
            update: settings.update,
            row_count: 0,
            skipped_row_count: 0,
            skipped_item_count: 0,
            file_position: RowCursor::default(),
            status: None,
            column_maps: settings.column_maps,
            created_at: Utc::now(),
        };
        self.store.insert_import(&import).await?;
        tracing::info!(
            import_id = %import.id,
            "Created {} import for '{}'",
            import.format.as_str(),
            import.original_filename
        );
        Ok(import)
    }

    /// Begin processing from the first row
    pub async fn start(&self, import: &mut Import) -> Result<RunOutcome, ImportError> {
        if import.status.is_some() {
            return Err(invalid("start", import));
        }
        let log = ImportLog::new(import.id);
        log.info("Started import at: %time%");

        match RowSource::count_rows(&import.file_path, import.delimiter, import.enclosure) {
            Ok(count) => import.row_count = count as i64,
            Err(e) => {
                log.error(&format!("Cannot read import file: {}", e));
                import.status = Some(ImportStatus::OtherError);
                self.store.save_import(import).await?;
                return Err(e.into());
            }
        }
        import.file_position = RowCursor::default();
        import.status = Some(ImportStatus::InProgress);
        self.store.save_import(import).await?;

        self.run(import, &log, RunKind::Import).await
    }

    /// Continue a paused run from its saved position
    pub async fn resume(&self, import: &mut Import) -> Result<RunOutcome, ImportError> {
        let log = ImportLog::new(import.id);
        let kind = match import.status {
            Some(ImportStatus::Queued) => {
                log.info("Resumed import at: %time%");
                import.status = Some(ImportStatus::InProgress);
                RunKind::Import
            }
            Some(ImportStatus::QueuedUndo) => {
                log.info("Resumed undo import at: %time%");
                import.status = Some(ImportStatus::InProgressUndo);
                RunKind::Undo
            }
            _ => return Err(invalid("resume", import)),
        };
        self.store.save_import(import).await?;
        self.run(import, &log, kind).await
    }

    /// Remove every record this import created or updated. Needs a started
    /// import with no run in progress.
    pub async fn undo(&self, import: &mut Import) -> Result<RunOutcome, ImportError> {
        match import.status {
            None => return Err(invalid("undo", import)),
            Some(status) if status.is_error() || status.is_running() || status == ImportStatus::Stopped => {
                return Err(invalid("undo", import))
            }
            Some(_) => {}
        }
        let log = ImportLog::new(import.id);
        log.info("Started undo import at: %time%");
        import.status = Some(ImportStatus::InProgressUndo);
        self.store.save_import(import).await?;
        self.run(import, &log, RunKind::Undo).await
    }

    /// Pause an in-progress import. Returns `false` when not applicable.
    pub async fn queue(&self, import: &mut Import) -> Result<bool, ImportError> {
        self.pause(import, ImportStatus::InProgress, ImportStatus::Queued).await
    }

    /// Pause an in-progress undo. Returns `false` when not applicable.
    pub async fn queue_undo(&self, import: &mut Import) -> Result<bool, ImportError> {
        self.pause(import, ImportStatus::InProgressUndo, ImportStatus::QueuedUndo)
            .await
    }

    async fn pause(&self, import: &mut Import, from: ImportStatus, to: ImportStatus) -> Result<bool, ImportError> {
        let log = ImportLog::new(import.id);
        if import.status != Some(from) {
            log.warn(&format!(
                "Cannot move import to '{}' from '{}'",
                to.as_str(),
                import.status_name()
            ));
            return Ok(false);
        }
        import.status = Some(to);
        self.store.save_import(import).await?;
        Ok(true)
    }

    /// Mark a running import `stopped`. No-op (returns `false`) otherwise.
    pub async fn stop(&self, import: &mut Import, reason: Option<&str>) -> Result<bool, ImportError> {
        if !import.is_running() {
            return Ok(false);
        }
        let log = ImportLog::new(import.id);
        match reason {
            Some(reason) => log.error(&format!("Stopping import due to error: {}", reason)),
            None => log.error("Stopping import due to error."),
        }
        import.status = Some(ImportStatus::Stopped);
        self.store.save_import(import).await?;
        Ok(true)
    }

    /// Ask a run of this process to pause at the next row boundary
    pub fn interrupt(&self, import_id: &Uuid) -> bool {
        self.interrupts.interrupt(import_id)
    }

    pub async fn progress(&self, import: &Import) -> Result<ImportProgress, ImportError> {
        Ok(ImportProgress {
            imported: self.store.count_imported_items(import.id).await?,
            skipped_rows: import.skipped_row_count,
            skipped_items: import.skipped_item_count,
        })
    }

    /// Delete an import row, its ledger and its stored CSV copy
    pub async fn delete(&self, import: &Import) -> Result<(), ImportError> {
        if import.is_running() {
            return Err(invalid("delete", import));
        }
        self.store.delete_import(import.id).await?;
        match tokio::fs::remove_file(&import.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(import_id = %import.id, "Failed to remove {}: {}", import.file_path, e)
            }
        }
        tracing::info!(import_id = %import.id, "Deleted import");
        Ok(())
    }

    /// Execute a loop under the crash guard: a panic inside the body leaves
    /// the import `stopped` instead of `in_progress` forever.
    async fn run(&self, import: &mut Import, log: &ImportLog, kind: RunKind) -> Result<RunOutcome, ImportError> {
        let guard = self.interrupts.register(import.id);

        let outcome = {
            let body = async {
                match kind {
                    RunKind::Import => self.import_loop(import, &guard, log).await,
                    RunKind::Undo => self.undo_loop(import, &guard, log).await,
                }
            };
            AssertUnwindSafe(body).catch_unwind().await
        };

        match outcome {
            Ok(result) => {
                self.stop(import, None).await?;
                result
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.stop(import, Some(&message)).await?;
                Err(ImportError::Panicked(message))
            }
        }
    }

    async fn import_loop(&self, import: &mut Import, guard: &RunGuard, log: &ImportLog) -> Result<RunOutcome, ImportError> {
        let mut imported = 0u64;
        match self.process_rows(import, guard, log, &mut imported).await {
            Ok(outcome) => Ok(outcome),
            Err(ImportError::Interrupted) => {
                log.info("Import interrupted at: %time%");
                self.queue(import).await?;
                Ok(RunOutcome::Queued { position: import.file_position })
            }
            Err(e) => {
                log.error(&format!("Import failed: {}", e));
                import.status = Some(ImportStatus::ImportError);
                if let Err(save) = self.store.save_import(import).await {
                    log.error(&format!("Failed to record import error: {:#}", save));
                }
                Err(e)
            }
        }
    }

    async fn process_rows(
        &self,
        import: &mut Import,
        guard: &RunGuard,
        log: &ImportLog,
        imported: &mut u64,
    ) -> Result<RunOutcome, ImportError> {
        let mut rows = RowSource::open(&import.file_path, import.delimiter, import.enclosure)?;
        rows.skip_invalid_rows(true);
        if import.file_position.is_start() {
            rows.rewind()?;
        } else {
            rows.seek(&import.file_position)?;
        }
        log.debug("Item import loop started at: %time%");
        log.debug("Memory usage: %memory%");

        while rows.valid() {
            if guard.is_interrupted() {
                return Err(ImportError::Interrupted);
            }
            let row = match rows.current() {
                Some(row) => row.clone(),
                None => break,
            };
            let index = rows.key();
            // Malformed rows before this one count only once the row is done;
            // an interrupted row is re-read from the saved position.
            let skipped_before = rows.take_skipped_count() as i64;

            let result = import.column_maps.map(&row, self.repository.as_ref()).await?;
            let outcome = {
                let ctx = RowContext {
                    import: &*import,
                    repository: self.repository.as_ref(),
                    store: self.store.as_ref(),
                    log,
                };
                import_handlers::process_row(&ctx, &result).await?
            };
            match outcome {
                RowOutcome::Skipped(reason) => {
                    import.skipped_item_count += 1;
                    log.warn(&format!("Skipped row {}: {}", index, reason));
                }
                RowOutcome::Imported(_) | RowOutcome::Updated(_) => *imported += 1,
                RowOutcome::FileUpdated(_) | RowOutcome::FilesAttached(_) => {}
            }

            import.skipped_row_count += skipped_before;
            import.file_position = rows.tell();
            self.store.save_import(import).await?;

            if self.batch_size > 0 && index % self.batch_size as u64 == 0 {
                log.info(&format!("Completed importing batch of {} items.", self.batch_size));
                log.debug("Memory usage: %memory%");
                self.queue(import).await?;
                return Ok(RunOutcome::Queued { position: import.file_position });
            }
            rows.advance()?;
        }

        let trailing = rows.take_skipped_count() as i64;
        import.skipped_row_count += trailing;
        import.status = Some(ImportStatus::Completed);
        self.store.save_import(import).await?;
        log.info(&format!(
            "Finished importing {} items (skipped {} rows).",
            *imported, import.skipped_row_count
        ));
        Ok(RunOutcome::Completed { imported: *imported })
    }

    async fn undo_loop(&self, import: &mut Import, guard: &RunGuard, log: &ImportLog) -> Result<RunOutcome, ImportError> {
        let mut deleted = 0u64;
        match self.delete_ledger(import, guard, log, &mut deleted).await {
            Ok(outcome) => Ok(outcome),
            Err(ImportError::Interrupted) => {
                log.info("Undo import interrupted at: %time%");
                self.queue_undo(import).await?;
                Ok(RunOutcome::UndoQueued { deleted })
            }
            Err(e) => {
                log.error(&format!("Undo import failed: {}", e));
                import.status = Some(ImportStatus::UndoImportError);
                if let Err(save) = self.store.save_import(import).await {
                    log.error(&format!("Failed to record undo error: {:#}", save));
                }
                Err(e)
            }
        }
    }

    /// Delete ledgered records page by page, most recent first. Ledger rows
    /// go away only for records that were processed, so an interrupted or
    /// failed pass leaves a ledger that still lists every remaining record.
    async fn delete_ledger(
        &self,
        import: &mut Import,
        guard: &RunGuard,
        log: &ImportLog,
        deleted: &mut u64,
    ) -> Result<RunOutcome, ImportError> {
        let page_size = if self.batch_size > 0 {
            UNDO_PAGE_SIZE.min(self.batch_size)
        } else {
            UNDO_PAGE_SIZE
        };

        loop {
            let page = self
                .store
                .imported_items_page(import.id, page_size as i64)
                .await?;
            if page.is_empty() {
                break;
            }
            let ids: Vec<i64> = page.iter().map(|entry| entry.item_id).collect();
            let records = self.repository.find_records(&ids).await?;

            let mut processed = Vec::with_capacity(page.len());
            let mut batch_full = false;
            let mut failure = None;
            for entry in &page {
                if guard.is_interrupted() {
                    failure = Some(ImportError::Interrupted);
                    break;
                }
                match records.iter().find(|r| r.id == entry.item_id) {
                    Some(record) => match self.repository.delete_record(record).await {
                        Ok(()) => *deleted += 1,
                        Err(e) => {
                            failure = Some(e.into());
                            break;
                        }
                    },
                    None => log.debug(&format!("Item {} already gone", entry.item_id)),
                }
                processed.push(entry.item_id);
                if self.batch_size > 0 && *deleted > 0 && *deleted % self.batch_size as u64 == 0 {
                    batch_full = true;
                    break;
                }
            }

            if !processed.is_empty() {
                self.store.delete_imported_items(import.id, &processed).await?;
            }
            if let Some(e) = failure {
                return Err(e);
            }
            if batch_full {
                log.info(&format!("Completed undoing batch of {} items.", self.batch_size));
                self.queue_undo(import).await?;
                return Ok(RunOutcome::UndoQueued { deleted: *deleted });
            }
        }

        import.status = Some(ImportStatus::CompletedUndo);
        self.store.save_import(import).await?;
        log.info(&format!("Finished undoing import: deleted {} items.", *deleted));
        Ok(RunOutcome::UndoCompleted { deleted: *deleted })
    }
}

fn invalid(operation: &'static str, import: &Import) -> ImportError {
    ImportError::InvalidTransition {
        operation,
        status: import.status_name(),
    }
}

fn validate_settings(settings: &ImportSettings) -> Result<(), ImportError> {
    if !settings.delimiter.is_ascii() || !settings.enclosure.is_ascii() {
        return Err(ImportError::InvalidConfig(
            "delimiter and enclosure must be single ASCII characters".to_string(),
        ));
    }
    if settings.delimiter == settings.enclosure {
        return Err(ImportError::InvalidConfig(
            "delimiter and enclosure must differ".to_string(),
        ));
    }
    settings
        .column_maps
        .validate()
        .map_err(ImportError::InvalidConfig)?;

    let required = match settings.format {
        ImportFormat::File => Some("filename"),
        ImportFormat::Update => Some("update_identifier"),
        ImportFormat::Mix => Some("source_item_id"),
        ImportFormat::Item | ImportFormat::Report => None,
    };
    if let Some(kind) = required {
        if !settings.column_maps.has(kind) {
            return Err(ImportError::InvalidConfig(format!(
                "{} imports need a '{}' column map",
                settings.format.as_str(),
                kind
            )));
        }
    }
    if !Path::new(&settings.source_path).is_file() {
        return Err(ImportError::InvalidConfig(format!(
            "import file {} does not exist",
            settings.source_path
        )));
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
