//! Business logic services

pub mod column_map;
pub mod file_ingest;
pub mod import_engine;
pub mod import_handlers;
pub mod import_log;
pub mod import_store;
pub mod interruption;
pub mod repository;
pub mod row_source;
