//! Content repository record types

use serde::{Deserialize, Serialize};

/// Kind of record stored in the content repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Item,
    File,
    Collection,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Item => "item",
            RecordKind::File => "file",
            RecordKind::Collection => "collection",
        }
    }

    /// Parse a record type name as written in a CSV column or on the CLI
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "item" | "items" => Some(RecordKind::Item),
            "file" | "files" => Some(RecordKind::File),
            "collection" | "collections" => Some(RecordKind::Collection),
            _ => None,
        }
    }
}

/// A record held by the content repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub kind: RecordKind,
    /// Owning item for file records
    pub item_id: Option<i64>,
    pub original_filename: Option<String>,
    pub file_order: Option<i32>,
}

impl Record {
    /// Items are the only records that own files
    pub fn supports_files(&self) -> bool {
        self.kind == RecordKind::Item
    }
}

/// Base metadata used when creating an item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMetadata {
    pub item_type_id: Option<i64>,
    /// Item type by name; takes precedence over `item_type_id` when set
    pub item_type_name: Option<String>,
    pub collection_id: Option<i64>,
    pub public: bool,
    pub featured: bool,
    /// Opaque plugin payloads carried through to the repository
    pub extra: Vec<serde_json::Value>,
}

/// One element text value to write on a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTextEntry {
    pub element_id: i64,
    pub text: String,
    pub html: bool,
}

impl ElementTextEntry {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Element addressed by set and name, e.g. `Dublin Core:Identifier`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRef {
    pub element_set: String,
    pub name: String,
}

/// How an Update row locates its target record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentifierField {
    InternalId,
    OriginalFilename,
    Element(ElementRef),
}

impl IdentifierField {
    /// Parse `internal id`, `original filename` or `Element Set:Element`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.to_lowercase().as_str() {
            "" => None,
            "internal id" | "internal_id" | "id" => Some(IdentifierField::InternalId),
            "original filename" | "original_filename" | "filename" => {
                Some(IdentifierField::OriginalFilename)
            }
            _ => {
                let (set, name) = value.split_once(':')?;
                let (set, name) = (set.trim(), name.trim());
                if set.is_empty() || name.is_empty() {
                    return None;
                }
                Some(IdentifierField::Element(ElementRef {
                    element_set: set.to_string(),
                    name: name.to_string(),
                }))
            }
        }
    }

    pub fn to_setting(&self) -> String {
        match self {
            IdentifierField::InternalId => "internal id".to_string(),
            IdentifierField::OriginalFilename => "original filename".to_string(),
            IdentifierField::Element(e) => format!("{}:{}", e.element_set, e.name),
        }
    }
}

/// Element text write strategy for Update rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Append values, skipping empties
    Add,
    /// Overwrite element ids present in the row, skipping empties
    Replace,
    /// Overwrite element ids present in the row; empty values clear the field
    ReplaceAll,
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Add => "add",
            UpdateMode::Replace => "replace",
            UpdateMode::ReplaceAll => "replace_all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "add" => Some(UpdateMode::Add),
            "replace" => Some(UpdateMode::Replace),
            "replace_all" | "replaceall" => Some(UpdateMode::ReplaceAll),
            _ => None,
        }
    }
}
