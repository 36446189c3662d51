//! Postgres-backed import store

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries::import as queries;
use crate::services::import_store::ImportStore;
use crate::types::{Import, ImportedItem};

#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn insert_import(&self, import: &Import) -> Result<()> {
        queries::insert_import(&self.pool, import).await
    }

    async fn save_import(&self, import: &Import) -> Result<()> {
        queries::update_import(&self.pool, import).await
    }

    async fn find_import(&self, id: Uuid) -> Result<Option<Import>> {
        queries::get_import(&self.pool, id).await
    }

    async fn list_imports(&self) -> Result<Vec<Import>> {
        queries::list_imports(&self.pool).await
    }

    async fn next_queued_import(&self) -> Result<Option<Import>> {
        queries::next_queued_import(&self.pool).await
    }

    async fn delete_import(&self, id: Uuid) -> Result<()> {
        queries::delete_import(&self.pool, id).await
    }

    async fn mark_abandoned_runs_stopped(&self) -> Result<u64> {
        queries::mark_running_stopped(&self.pool).await
    }

    async fn record_imported_item(&self, entry: &ImportedItem) -> Result<()> {
        queries::insert_imported_item(&self.pool, entry).await
    }

    async fn find_imported_item_by_source_id(
        &self,
        import_id: Uuid,
        source_item_id: &str,
    ) -> Result<Option<ImportedItem>> {
        queries::find_imported_item_by_source_id(&self.pool, import_id, source_item_id).await
    }

    async fn imported_items_page(&self, import_id: Uuid, limit: i64) -> Result<Vec<ImportedItem>> {
        queries::imported_items_page(&self.pool, import_id, limit).await
    }

    async fn delete_imported_items(&self, import_id: Uuid, item_ids: &[i64]) -> Result<u64> {
        queries::delete_imported_items(&self.pool, import_id, item_ids).await
    }

    async fn count_imported_items(&self, import_id: Uuid) -> Result<i64> {
        queries::count_imported_items(&self.pool, import_id).await
    }
}
