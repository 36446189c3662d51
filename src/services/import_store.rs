//! Persistence seam for import runs and the imported-item ledger

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{Import, ImportedItem};

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn insert_import(&self, import: &Import) -> Result<()>;

    /// Persist every mutable field of `import` immediately
    async fn save_import(&self, import: &Import) -> Result<()>;

    async fn find_import(&self, id: Uuid) -> Result<Option<Import>>;

    /// All imports, newest first
    async fn list_imports(&self) -> Result<Vec<Import>>;

    /// Oldest import waiting in `queued` or `queued_undo`
    async fn next_queued_import(&self) -> Result<Option<Import>>;

    /// Remove an import and its ledger rows
    async fn delete_import(&self, id: Uuid) -> Result<()>;

    /// Mark runs left in progress by a dead process as `stopped`
    async fn mark_abandoned_runs_stopped(&self) -> Result<u64>;

    /// Append a ledger entry; re-recording the same item is a no-op
    async fn record_imported_item(&self, entry: &ImportedItem) -> Result<()>;

    /// Ledger entry of this import for a source-row identifier
    async fn find_imported_item_by_source_id(
        &self,
        import_id: Uuid,
        source_item_id: &str,
    ) -> Result<Option<ImportedItem>>;

    /// Up to `limit` ledger entries, most recent first
    async fn imported_items_page(&self, import_id: Uuid, limit: i64) -> Result<Vec<ImportedItem>>;

    /// Delete the ledger rows for `item_ids` in one statement
    async fn delete_imported_items(&self, import_id: Uuid, item_ids: &[i64]) -> Result<u64>;

    async fn count_imported_items(&self, import_id: Uuid) -> Result<i64>;
}
