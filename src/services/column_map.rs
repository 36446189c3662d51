//! Column map behavior: per-column extraction and per-row aggregation

use crate::services::repository::{Repository, RepositoryError};
use crate::services::row_source::Row;
use crate::types::{ColumnMap, ColumnMapSet, ElementTextEntry, FileUrl, RowResult};

/// What a single column map adds to a row result
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Collection(Option<i64>),
    ElementText(ElementTextEntry),
    FileUrls(Vec<FileUrl>),
    Filename(String),
    SourceItemId(String),
    FileOrder(String),
    Plugin(serde_json::Value),
    UpdateIdentifier(String),
    UpdateMode(String),
    RecordType(String),
    Public(Option<bool>),
    Featured(Option<bool>),
    ItemType(String),
    /// Column read but not used (unmapped, or absent from the file)
    Ignored,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Split a file column into ordered sources; blank segments are dropped
fn split_file_urls(value: &str) -> Vec<FileUrl> {
    value
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .enumerate()
        .map(|(i, url)| FileUrl {
            source: url.to_string(),
            name: url.to_string(),
            order: i as u32 + 1,
        })
        .collect()
}

impl ColumnMap {
    /// Read this map's column from `row`.
    ///
    /// Only `Tag` touches the repository: it resolves the column as a
    /// collection title and creates the collection when none matches. That
    /// lookup-or-create is best effort; two imports creating the same title
    /// at once may both create it.
    pub async fn apply(&self, row: &Row, repository: &dyn Repository) -> Result<Contribution, RepositoryError> {
        let raw = match row.get(self.column()) {
            Some(raw) => raw,
            None => match self {
                ColumnMap::Element { .. } => "",
                _ => return Ok(Contribution::Ignored),
            },
        };

        let contribution = match self {
            ColumnMap::Element { element_id, html, .. } => Contribution::ElementText(ElementTextEntry {
                element_id: *element_id,
                text: raw.to_string(),
                html: *html,
            }),
            ColumnMap::Tag { .. } => {
                if raw.trim().is_empty() {
                    return Ok(Contribution::Collection(None));
                }
                let collection = match repository.find_collection_by_title(raw).await? {
                    Some(collection) => collection,
                    None => {
                        tracing::info!("Collection '{}' not found, creating it", raw);
                        repository.create_collection(raw).await?;
                        repository
                            .find_collection_by_title(raw)
                            .await?
                            .ok_or_else(|| RepositoryError::Validation(format!(
                                "collection '{}' could not be resolved after creation",
                                raw
                            )))?
                    }
                };
                Contribution::Collection(Some(collection.id))
            }
            ColumnMap::File { .. } => Contribution::FileUrls(split_file_urls(raw)),
            ColumnMap::Filename { .. } => Contribution::Filename(raw.to_string()),
            ColumnMap::SourceItemId { .. } => Contribution::SourceItemId(raw.to_string()),
            ColumnMap::FileOrder { .. } => Contribution::FileOrder(raw.to_string()),
            ColumnMap::Plugin { .. } => {
                if raw.trim().is_empty() {
                    Contribution::Ignored
                } else {
                    Contribution::Plugin(serde_json::from_str(raw).unwrap_or(serde_json::Value::Null))
                }
            }
            ColumnMap::Unmapped { .. } => Contribution::Ignored,
            ColumnMap::UpdateIdentifier { .. } => Contribution::UpdateIdentifier(raw.to_string()),
            ColumnMap::UpdateMode { .. } => Contribution::UpdateMode(raw.to_string()),
            ColumnMap::RecordType { .. } => Contribution::RecordType(raw.to_string()),
            ColumnMap::Public { .. } => Contribution::Public(parse_flag(raw)),
            ColumnMap::Featured { .. } => Contribution::Featured(parse_flag(raw)),
            ColumnMap::ItemType { .. } => Contribution::ItemType(raw.trim().to_string()),
        };
        Ok(contribution)
    }
}

impl ColumnMapSet {
    /// Run `row` through every map in order and merge the contributions.
    /// List buckets append in map order. Single-value buckets keep the last
    /// contribution, empty or not, except collection, public, featured and
    /// item type, which ignore cells that yield no value.
    pub async fn map(&self, row: &Row, repository: &dyn Repository) -> Result<RowResult, RepositoryError> {
        let mut result = RowResult::default();
        for map in &self.maps {
            match map.apply(row, repository).await? {
                Contribution::Collection(Some(id)) => result.collection_id = Some(id),
                Contribution::Collection(None) => {}
                Contribution::ElementText(entry) => result.element_texts.push(entry),
                Contribution::FileUrls(urls) => result.file_urls.extend(urls),
                Contribution::Filename(name) => result.filename = Some(name),
                Contribution::SourceItemId(id) => result.source_item_id = Some(id),
                Contribution::FileOrder(order) => result.file_order = Some(order),
                Contribution::Plugin(payload) => result.plugin.push(payload),
                Contribution::UpdateIdentifier(value) => result.update_identifier = Some(value),
                Contribution::UpdateMode(value) => result.update_mode = Some(value),
                Contribution::RecordType(value) => result.record_type = Some(value),
                Contribution::Public(Some(flag)) => result.public = Some(flag),
                Contribution::Featured(Some(flag)) => result.featured = Some(flag),
                Contribution::Public(None) | Contribution::Featured(None) => {}
                Contribution::ItemType(name) if !name.is_empty() => result.item_type_name = Some(name),
                Contribution::ItemType(_) | Contribution::Ignored => {}
            }
        }
        Ok(result)
    }
}
