//! CSV Import Worker - resumable, undoable bulk import of CSV rows into a
//! content repository.

mod cli;
mod commands;
mod config;
mod db;
mod services;
#[cfg(test)]
mod testing;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::db::repository::PgRepository;
use crate::db::store::PgImportStore;
use crate::services::file_ingest::FileIngester;
use crate::services::import_engine::ImportEngine;
use crate::services::interruption::INTERRUPTS;

/// Connections needed: one run plus the CLI/poller queries
const MAX_DB_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "csv-import.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,csv_import_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve);

    // Preview only reads a local file
    if let Command::Preview { file, delimiter, enclosure } = &command {
        return commands::preview(file, *delimiter, *enclosure);
    }

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, MAX_DB_CONNECTIONS).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;
    if matches!(command, Command::Migrate) {
        return Ok(());
    }

    let ingester = FileIngester::new(&config.storage_dir, config.http_timeout)?;
    let repository = PgRepository::new(pool.clone(), ingester).await?;
    let engine = Arc::new(
        ImportEngine::new(
            Arc::new(PgImportStore::new(pool)),
            Arc::new(repository),
            INTERRUPTS.clone(),
        )
        .with_batch_size(config.batch_size)
        .with_storage_dir(&config.storage_dir),
    );

    let shutdown = commands::watch_for_shutdown();

    match command {
        Command::Serve => {
            info!("Starting CSV import worker...");
            commands::serve(engine, config.poll_interval, config.max_run_time, shutdown).await
        }
        Command::Create(args) => commands::create(&engine, args, &config.tag_delimiter).await,
        Command::Start { id } => commands::start(&engine, id).await,
        Command::Resume { id } => commands::resume(&engine, id).await,
        Command::Undo { id } => commands::undo(&engine, id).await,
        Command::Status { id } => commands::status(&engine, id).await,
        Command::List => commands::list(&engine).await,
        Command::Delete { id } => commands::delete(&engine, id).await,
        Command::Migrate | Command::Preview { .. } => Ok(()),
    }
}
