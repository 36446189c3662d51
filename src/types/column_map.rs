//! Column map configuration and per-row mapping results
//!
//! The configuration is stored with every import as versioned JSON:
//!
//! ```json
//! {"version": 1, "maps": [
//!     {"kind": "element", "column": "title", "element_id": 1, "html": false},
//!     {"kind": "file", "column": 2}
//! ]}
//! ```
//!
//! New map kinds may be added; stored configurations of an older version
//! must keep loading.

use serde::{Deserialize, Serialize};

use super::record::ElementTextEntry;

/// Latest column map configuration schema version
pub const COLUMN_MAP_SCHEMA_VERSION: u32 = 1;

/// Default separator stored on tag maps
pub const DEFAULT_TAG_DELIMITER: &str = ",";

/// Column addressed by zero-based index or by header name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "#{}", i),
            ColumnRef::Name(name) => write!(f, "'{}'", name),
        }
    }
}

fn default_tag_delimiter() -> String {
    DEFAULT_TAG_DELIMITER.to_string()
}

/// One mapping rule from a CSV column onto a target kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnMap {
    /// Element text for `element_id`
    Element {
        column: ColumnRef,
        element_id: i64,
        #[serde(default)]
        html: bool,
    },
    /// Collection resolved (or created) by exact title
    Tag {
        column: ColumnRef,
        #[serde(default = "default_tag_delimiter")]
        delimiter: String,
    },
    /// Comma separated file URLs or paths
    File { column: ColumnRef },
    Filename { column: ColumnRef },
    SourceItemId { column: ColumnRef },
    FileOrder { column: ColumnRef },
    /// JSON payload handed to the repository untouched
    Plugin { column: ColumnRef },
    #[serde(rename = "none")]
    Unmapped { column: ColumnRef },
    UpdateIdentifier { column: ColumnRef },
    UpdateMode { column: ColumnRef },
    RecordType { column: ColumnRef },
    Public { column: ColumnRef },
    Featured { column: ColumnRef },
    ItemType { column: ColumnRef },
}

impl ColumnMap {
    pub fn column(&self) -> &ColumnRef {
        match self {
            ColumnMap::Element { column, .. }
            | ColumnMap::Tag { column, .. }
            | ColumnMap::File { column }
            | ColumnMap::Filename { column }
            | ColumnMap::SourceItemId { column }
            | ColumnMap::FileOrder { column }
            | ColumnMap::Plugin { column }
            | ColumnMap::Unmapped { column }
            | ColumnMap::UpdateIdentifier { column }
            | ColumnMap::UpdateMode { column }
            | ColumnMap::RecordType { column }
            | ColumnMap::Public { column }
            | ColumnMap::Featured { column }
            | ColumnMap::ItemType { column } => column,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ColumnMap::Element { .. } => "element",
            ColumnMap::Tag { .. } => "tag",
            ColumnMap::File { .. } => "file",
            ColumnMap::Filename { .. } => "filename",
            ColumnMap::SourceItemId { .. } => "source_item_id",
            ColumnMap::FileOrder { .. } => "file_order",
            ColumnMap::Plugin { .. } => "plugin",
            ColumnMap::Unmapped { .. } => "none",
            ColumnMap::UpdateIdentifier { .. } => "update_identifier",
            ColumnMap::UpdateMode { .. } => "update_mode",
            ColumnMap::RecordType { .. } => "record_type",
            ColumnMap::Public { .. } => "public",
            ColumnMap::Featured { .. } => "featured",
            ColumnMap::ItemType { .. } => "item_type",
        }
    }
}

/// Ordered, versioned set of column maps attached to an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapSet {
    pub version: u32,
    pub maps: Vec<ColumnMap>,
}

impl ColumnMapSet {
    pub fn new(maps: Vec<ColumnMap>) -> Self {
        Self {
            version: COLUMN_MAP_SCHEMA_VERSION,
            maps,
        }
    }

    /// Check the configuration is loadable and usable
    pub fn validate(&self) -> Result<(), String> {
        if self.version == 0 || self.version > COLUMN_MAP_SCHEMA_VERSION {
            return Err(format!(
                "unsupported column map schema version {} (latest is {})",
                self.version, COLUMN_MAP_SCHEMA_VERSION
            ));
        }
        if self.maps.is_empty() {
            return Err("at least one column map is required".to_string());
        }
        for map in &self.maps {
            if let ColumnMap::Element { element_id, column, .. } = map {
                if *element_id <= 0 {
                    return Err(format!("element map on column {} has no element id", column));
                }
            }
            if let ColumnMap::Tag { delimiter, column } = map {
                if delimiter.is_empty() {
                    return Err(format!("tag map on column {} has an empty delimiter", column));
                }
            }
        }
        Ok(())
    }

    pub fn has(&self, kind: &str) -> bool {
        self.maps.iter().any(|m| m.kind_name() == kind)
    }
}

/// One file to ingest, in row order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUrl {
    pub source: String,
    pub name: String,
    /// 1-based position within its column
    pub order: u32,
}

/// Aggregated contributions of every column map for one row.
///
/// Handlers consume only this; they never re-read raw columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowResult {
    pub collection_id: Option<i64>,
    pub file_urls: Vec<FileUrl>,
    pub element_texts: Vec<ElementTextEntry>,
    pub filename: Option<String>,
    pub source_item_id: Option<String>,
    /// Raw value; `Some("")` differs from `None` (column not mapped)
    pub file_order: Option<String>,
    pub public: Option<bool>,
    pub featured: Option<bool>,
    pub item_type_name: Option<String>,
    pub update_identifier: Option<String>,
    pub update_mode: Option<String>,
    pub record_type: Option<String>,
    pub plugin: Vec<serde_json::Value>,
}

impl RowResult {
    /// Element texts with empty values removed; `"0"` is kept
    pub fn non_empty_element_texts(&self) -> Vec<ElementTextEntry> {
        self.element_texts
            .iter()
            .filter(|e| !e.is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_map_set_loads_documented_schema() {
        let json = r#"{"version": 1, "maps": [
            {"kind": "element", "column": "title", "element_id": 1},
            {"kind": "file", "column": 2},
            {"kind": "tag", "column": "collection"},
            {"kind": "none", "column": 3}
        ]}"#;
        let set: ColumnMapSet = serde_json::from_str(json).unwrap();

        assert_eq!(set.maps.len(), 4);
        assert_eq!(
            set.maps[0],
            ColumnMap::Element {
                column: ColumnRef::Name("title".to_string()),
                element_id: 1,
                html: false,
            }
        );
        assert_eq!(set.maps[1].column(), &ColumnRef::Index(2));
        assert_eq!(
            set.maps[2],
            ColumnMap::Tag {
                column: ColumnRef::Name("collection".to_string()),
                delimiter: ",".to_string(),
            }
        );
        assert_eq!(set.maps[3].kind_name(), "none");
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_column_map_set_survives_storage_round_trip() {
        let set = ColumnMapSet::new(vec![
            ColumnMap::Element { column: ColumnRef::Index(0), element_id: 50, html: true },
            ColumnMap::UpdateMode { column: ColumnRef::Name("mode".to_string()) },
        ]);
        let stored = serde_json::to_value(&set).unwrap();
        assert_eq!(stored["maps"][0]["kind"], "element");
        assert_eq!(stored["maps"][1]["kind"], "update_mode");

        let loaded: ColumnMapSet = serde_json::from_value(stored).unwrap();
        assert_eq!(loaded, set);
    }

    #[test]
    fn test_validate_rejects_future_version() {
        let mut set = ColumnMapSet::new(vec![ColumnMap::File { column: ColumnRef::Index(0) }]);
        set.version = COLUMN_MAP_SCHEMA_VERSION + 1;
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_and_unbound_element() {
        assert!(ColumnMapSet::new(vec![]).validate().is_err());
        let set = ColumnMapSet::new(vec![ColumnMap::Element {
            column: ColumnRef::Index(0),
            element_id: 0,
            html: false,
        }]);
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_non_empty_element_texts_keeps_zero() {
        let result = RowResult {
            element_texts: vec![
                ElementTextEntry { element_id: 1, text: "".to_string(), html: false },
                ElementTextEntry { element_id: 2, text: "0".to_string(), html: false },
            ],
            ..Default::default()
        };
        let kept = result.non_empty_element_texts();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].element_id, 2);
    }
}
