//! Database queries

pub mod import;
pub mod record;
