//! CLI argument parsing for the csv-import-worker binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::types::{ImportFormat, RecordKind, UpdateMode};

#[derive(Parser)]
#[command(name = "csv-import-worker", about = "Resumable CSV bulk-import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Process queued imports until interrupted (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Register a CSV file for import
    Create(CreateArgs),
    /// Show the headers and first row of a CSV file
    Preview {
        file: PathBuf,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
        #[arg(long, default_value_t = '"')]
        enclosure: char,
    },
    /// Start a pending import
    Start { id: Uuid },
    /// Resume a queued import or undo
    Resume { id: Uuid },
    /// Undo an import
    Undo { id: Uuid },
    /// Show status and progress of an import
    Status { id: Uuid },
    /// List all imports, newest first
    List,
    /// Delete an import and its stored file
    Delete { id: Uuid },
}

#[derive(Args)]
pub struct CreateArgs {
    /// CSV file to import
    pub file: PathBuf,

    /// JSON file with the column maps
    #[arg(long)]
    pub maps: PathBuf,

    #[arg(long, value_parser = parse_format, default_value = "item")]
    pub format: ImportFormat,

    #[arg(long, default_value_t = ',')]
    pub delimiter: char,

    #[arg(long, default_value_t = '"')]
    pub enclosure: char,

    /// Display name; defaults to the file name
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub item_type_id: Option<i64>,

    #[arg(long)]
    pub collection_id: Option<i64>,

    #[arg(long)]
    pub public: bool,

    #[arg(long)]
    pub featured: bool,

    /// `internal id`, `original filename` or `Element Set:Element`
    #[arg(long, default_value = "internal id")]
    pub update_identifier: String,

    #[arg(long, value_parser = parse_update_mode, default_value = "add")]
    pub update_mode: UpdateMode,

    #[arg(long, value_parser = parse_record_kind)]
    pub record_type: Option<RecordKind>,
}

fn parse_format(value: &str) -> Result<ImportFormat, String> {
    ImportFormat::parse(value).ok_or_else(|| format!("unknown format '{}' (item, file, mix, update, report)", value))
}

fn parse_update_mode(value: &str) -> Result<UpdateMode, String> {
    UpdateMode::parse(value).ok_or_else(|| format!("unknown update mode '{}' (add, replace, replace_all)", value))
}

fn parse_record_kind(value: &str) -> Result<RecordKind, String> {
    RecordKind::parse(value).ok_or_else(|| format!("unknown record type '{}' (item, file, collection)", value))
}
