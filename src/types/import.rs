//! Import run types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::column_map::ColumnMapSet;
use super::record::{IdentifierField, RecordKind, UpdateMode};

/// Declared shape of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    Item,
    File,
    Mix,
    Update,
    /// Legacy report export, handled like `Item`
    Report,
}

impl ImportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportFormat::Item => "item",
            ImportFormat::File => "file",
            ImportFormat::Mix => "mix",
            ImportFormat::Update => "update",
            ImportFormat::Report => "report",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "item" => Some(ImportFormat::Item),
            "file" => Some(ImportFormat::File),
            "mix" => Some(ImportFormat::Mix),
            "update" => Some(ImportFormat::Update),
            "report" => Some(ImportFormat::Report),
            _ => None,
        }
    }
}

/// Import state machine status. An unstarted import has no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Queued,
    InProgress,
    Completed,
    QueuedUndo,
    InProgressUndo,
    CompletedUndo,
    ImportError,
    UndoImportError,
    OtherError,
    Stopped,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Queued => "queued",
            ImportStatus::InProgress => "in_progress",
            ImportStatus::Completed => "completed",
            ImportStatus::QueuedUndo => "queued_undo",
            ImportStatus::InProgressUndo => "in_progress_undo",
            ImportStatus::CompletedUndo => "completed_undo",
            ImportStatus::ImportError => "import_error",
            ImportStatus::UndoImportError => "undo_import_error",
            ImportStatus::OtherError => "other_error",
            ImportStatus::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(ImportStatus::Queued),
            "in_progress" => Some(ImportStatus::InProgress),
            "completed" => Some(ImportStatus::Completed),
            "queued_undo" => Some(ImportStatus::QueuedUndo),
            "in_progress_undo" => Some(ImportStatus::InProgressUndo),
            "completed_undo" => Some(ImportStatus::CompletedUndo),
            "import_error" => Some(ImportStatus::ImportError),
            "undo_import_error" => Some(ImportStatus::UndoImportError),
            "other_error" => Some(ImportStatus::OtherError),
            "stopped" => Some(ImportStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ImportStatus::ImportError | ImportStatus::UndoImportError | ImportStatus::OtherError
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ImportStatus::InProgress | ImportStatus::InProgressUndo)
    }
}

/// Resumable position in the row source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCursor {
    /// Byte offset where the next record starts
    pub byte: u64,
    /// Line number of that byte offset
    pub line: u64,
    /// Valid rows consumed before this position
    pub row: u64,
}

impl RowCursor {
    pub fn is_start(&self) -> bool {
        self.byte == 0
    }
}

/// Import-level defaults for Update rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub identifier: IdentifierField,
    pub mode: UpdateMode,
    pub record_type: Option<RecordKind>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            identifier: IdentifierField::InternalId,
            mode: UpdateMode::Add,
            record_type: None,
        }
    }
}

/// One bulk-load run
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub id: Uuid,
    pub original_filename: String,
    pub file_path: String,
    pub delimiter: char,
    pub enclosure: char,
    pub format: ImportFormat,
    pub item_type_id: Option<i64>,
    pub collection_id: Option<i64>,
    pub is_public: bool,
    pub is_featured: bool,
    pub update: UpdateSettings,
    pub row_count: i64,
    pub skipped_row_count: i64,
    pub skipped_item_count: i64,
    pub file_position: RowCursor,
    pub status: Option<ImportStatus>,
    pub column_maps: ColumnMapSet,
    pub created_at: DateTime<Utc>,
}

impl Import {
    pub fn status_name(&self) -> &'static str {
        self.status.map(|s| s.as_str()).unwrap_or("pending")
    }

    pub fn is_running(&self) -> bool {
        self.status.map_or(false, |s| s.is_running())
    }
}

/// Operator-supplied settings for a new import
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub source_path: String,
    pub original_filename: Option<String>,
    pub delimiter: char,
    pub enclosure: char,
    pub format: ImportFormat,
    pub item_type_id: Option<i64>,
    pub collection_id: Option<i64>,
    pub is_public: bool,
    pub is_featured: bool,
    pub update: UpdateSettings,
    pub column_maps: ColumnMapSet,
}

/// Ledger entry linking an import to a record it created or updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedItem {
    pub import_id: Uuid,
    pub item_id: i64,
    pub source_item_id: Option<String>,
}

/// Counters shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    /// Live ledger count, shrinks during undo
    pub imported: i64,
    pub skipped_rows: i64,
    pub skipped_items: i64,
}

impl std::fmt::Display for ImportProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported: {} / Skipped Rows: {} / Skipped Items: {}",
            self.imported, self.skipped_rows, self.skipped_items
        )
    }
}

/// Where a run stopped when control returns to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every row processed
    Completed { imported: u64 },
    /// Paused; `position` is where `resume` continues
    Queued { position: RowCursor },
    /// Ledger drained
    UndoCompleted { deleted: u64 },
    /// Undo paused; remaining ledger rows are still valid
    UndoQueued { deleted: u64 },
}
