//! Database module

pub mod queries;
pub mod repository;
pub mod store;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Apply pending migrations.
///
/// The `_sqlx_migrations` bookkeeping is reconciled with the embedded
/// migrations first: records of versions that are no longer shipped are
/// dropped and checksums that differ only by line endings are rewritten.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    if migration_table_exists(pool).await? {
        reconcile_applied_migrations(pool).await?;
    }
    MIGRATOR.run(pool).await.context("Migration failed")?;

    info!("Database migrations complete");
    Ok(())
}

async fn migration_table_exists(pool: &PgPool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

async fn reconcile_applied_migrations(pool: &PgPool) -> Result<()> {
    let applied: Vec<(i64, Vec<u8>)> =
        sqlx::query_as("SELECT version, checksum FROM _sqlx_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    for (version, checksum) in applied {
        let shipped = MIGRATOR
            .iter()
            .find(|m| m.version == version && !m.migration_type.is_down_migration());

        match shipped {
            None => {
                warn!("Forgetting applied migration {} (not shipped anymore)", version);
                sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some(migration) if checksum.as_slice() != &*migration.checksum => {
                warn!(
                    "Migration {} ({}) checksum differs, storing the shipped one",
                    version, migration.description
                );
                sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                    .bind(&*migration.checksum)
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some(_) => {}
        }
    }

    Ok(())
}
