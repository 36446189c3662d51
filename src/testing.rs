//! In-memory repository and import store used by unit tests

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::services::import_store::ImportStore;
use crate::services::interruption::InterruptRegistry;
use crate::services::repository::{FileSource, IngestOptions, Repository, RepositoryError};
use crate::types::{
    ElementTextEntry, IdentifierField, Import, ImportedItem, Record, RecordKind, RecordMetadata,
    UpdateMode,
};

pub const DC_TITLE: i64 = 50;
pub const DC_DESCRIPTION: i64 = 41;
pub const DC_IDENTIFIER: i64 = 43;

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Record,
    public: bool,
    featured: bool,
    collection_id: Option<i64>,
    item_type: Option<String>,
    texts: Vec<ElementTextEntry>,
}

#[derive(Default)]
struct RepoState {
    next_id: i64,
    records: HashMap<i64, StoredRecord>,
    item_types: HashSet<String>,
    failing_sources: HashSet<String>,
    rejected_titles: HashSet<String>,
    interrupt_on_title: Option<String>,
    panic_on_title: Option<String>,
    signal_on_title: Option<(InterruptRegistry, String)>,
    signal_after_deletes: Option<(InterruptRegistry, u32)>,
}

/// Repository double with knobs for validation, ingest and interruption faults
pub struct MemoryRepository {
    state: Mutex<RepoState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        let state = RepoState {
            next_id: 1,
            item_types: ["Sound", "Still Image", "Text"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        Self { state: Mutex::new(state) }
    }

    /// Every ingest of `source` fails
    pub fn fail_source(&self, source: &str) {
        self.state.lock().failing_sources.insert(source.to_string());
    }

    /// Items titled `title` fail validation
    pub fn reject_title(&self, title: &str) {
        self.state.lock().rejected_titles.insert(title.to_string());
    }

    /// Creating an item titled `title` reports `Interrupted`
    pub fn interrupt_on_title(&self, title: &str) {
        self.state.lock().interrupt_on_title = Some(title.to_string());
    }

    /// Creating an item titled `title` panics
    pub fn panic_on_title(&self, title: &str) {
        self.state.lock().panic_on_title = Some(title.to_string());
    }

    /// After creating an item titled `title`, interrupt every run in `registry`
    pub fn signal_on_title(&self, registry: InterruptRegistry, title: &str) {
        self.state.lock().signal_on_title = Some((registry, title.to_string()));
    }

    /// Interrupt every run in `registry` once `deletes` more records are gone
    pub fn signal_after_deletes(&self, registry: InterruptRegistry, deletes: u32) {
        self.state.lock().signal_after_deletes = Some((registry, deletes));
    }

    /// Seed a pre-existing item with the given element texts
    pub fn add_item(&self, texts: &[(i64, &str)]) -> Record {
        let id = self.state.lock().next_id;
        self.add_item_with_id(id, texts)
    }

    /// Seed a pre-existing item under a fixed id
    pub fn add_item_with_id(&self, id: i64, texts: &[(i64, &str)]) -> Record {
        let mut state = self.state.lock();
        let record = Record {
            id,
            kind: RecordKind::Item,
            item_id: None,
            original_filename: None,
            file_order: None,
        };
        state.next_id = state.next_id.max(id + 1);
        let texts = texts
            .iter()
            .map(|(element_id, text)| ElementTextEntry { element_id: *element_id, text: text.to_string(), html: false })
            .collect();
        state.records.insert(id, stored(record.clone(), false, None, texts));
        record
    }

    /// Seed a pre-existing file on `item`
    pub fn add_file(&self, item: &Record, filename: &str) -> Record {
        let mut state = self.state.lock();
        let record = Record {
            id: state.next_id,
            kind: RecordKind::File,
            item_id: Some(item.id),
            original_filename: Some(filename.to_string()),
            file_order: None,
        };
        state.next_id += 1;
        state.records.insert(record.id, stored(record.clone(), false, None, Vec::new()));
        record
    }

    pub fn exists(&self, id: i64) -> bool {
        self.state.lock().records.contains_key(&id)
    }

    pub fn item_count(&self) -> usize {
        self.count_kind(RecordKind::Item)
    }

    pub fn collection_count(&self) -> usize {
        self.count_kind(RecordKind::Collection)
    }

    fn count_kind(&self, kind: RecordKind) -> usize {
        self.state.lock().records.values().filter(|r| r.record.kind == kind).count()
    }

    pub fn is_public(&self, id: i64) -> bool {
        self.state.lock().records.get(&id).map_or(false, |r| r.public)
    }

    pub fn is_featured(&self, id: i64) -> bool {
        self.state.lock().records.get(&id).map_or(false, |r| r.featured)
    }

    pub fn collection_of(&self, id: i64) -> Option<i64> {
        self.state.lock().records.get(&id).and_then(|r| r.collection_id)
    }

    pub fn item_type_of(&self, id: i64) -> Option<String> {
        self.state.lock().records.get(&id).and_then(|r| r.item_type.clone())
    }

    /// Text values of `element_id` on record `id`, in write order
    pub fn texts(&self, id: i64, element_id: i64) -> Vec<String> {
        self.state
            .lock()
            .records
            .get(&id)
            .map(|r| {
                r.texts
                    .iter()
                    .filter(|t| t.element_id == element_id)
                    .map(|t| t.text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Files attached to `item_id`, in creation order
    pub fn files_of(&self, item_id: i64) -> Vec<Record> {
        let state = self.state.lock();
        let mut files: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.record.kind == RecordKind::File && r.record.item_id == Some(item_id))
            .map(|r| r.record.clone())
            .collect();
        files.sort_by_key(|r| r.id);
        files
    }

    /// Items whose Title equals `title`
    pub fn items_titled(&self, title: &str) -> Vec<i64> {
        let state = self.state.lock();
        let mut ids: Vec<i64> = state
            .records
            .values()
            .filter(|r| r.record.kind == RecordKind::Item && title_of(r) == Some(title))
            .map(|r| r.record.id)
            .collect();
        ids.sort();
        ids
    }
}

fn stored(record: Record, public: bool, collection_id: Option<i64>, texts: Vec<ElementTextEntry>) -> StoredRecord {
    StoredRecord {
        record,
        public,
        featured: false,
        collection_id,
        item_type: None,
        texts,
    }
}

fn title_of(record: &StoredRecord) -> Option<&str> {
    record
        .texts
        .iter()
        .find(|t| t.element_id == DC_TITLE)
        .map(|t| t.text.as_str())
}

fn element_id_of(element_set: &str, name: &str) -> Option<i64> {
    match (element_set, name) {
        ("Dublin Core", "Title") => Some(DC_TITLE),
        ("Dublin Core", "Description") => Some(DC_DESCRIPTION),
        ("Dublin Core", "Identifier") => Some(DC_IDENTIFIER),
        _ => None,
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_record(
        &self,
        metadata: &RecordMetadata,
        element_texts: &[ElementTextEntry],
    ) -> Result<Record, RepositoryError> {
        let mut state = self.state.lock();
        let title = element_texts
            .iter()
            .find(|t| t.element_id == DC_TITLE)
            .map(|t| t.text.clone());
        if let Some(title) = &title {
            if state.panic_on_title.as_ref() == Some(title) {
                drop(state);
                panic!("repository exploded on '{}'", title);
            }
            if state.interrupt_on_title.as_ref() == Some(title) {
                state.interrupt_on_title = None;
                return Err(RepositoryError::Interrupted);
            }
            if state.rejected_titles.contains(title) {
                return Err(RepositoryError::Validation(format!("title '{}' rejected", title)));
            }
        }
        if let Some(name) = &metadata.item_type_name {
            if !state.item_types.contains(name) {
                return Err(RepositoryError::Validation(format!("unknown item type '{}'", name)));
            }
        }

        let record = Record {
            id: state.next_id,
            kind: RecordKind::Item,
            item_id: None,
            original_filename: None,
            file_order: None,
        };
        state.next_id += 1;
        let mut entry = stored(
            record.clone(),
            metadata.public,
            metadata.collection_id,
            element_texts.iter().filter(|t| !t.is_empty()).cloned().collect(),
        );
        entry.featured = metadata.featured;
        entry.item_type = metadata.item_type_name.clone();
        state.records.insert(record.id, entry);
        if let (Some((registry, signal_title)), Some(title)) = (&state.signal_on_title, &title) {
            if signal_title == title {
                registry.interrupt_all();
            }
        }
        Ok(record)
    }

    async fn attach_file(
        &self,
        item: &Record,
        source: &FileSource,
        options: IngestOptions,
    ) -> Result<Option<Record>, RepositoryError> {
        let mut state = self.state.lock();
        if state.failing_sources.contains(source.as_str()) {
            if options.fail_on_invalid {
                return Err(RepositoryError::Ingest {
                    source_ref: source.as_str().to_string(),
                    reason: "not found".to_string(),
                });
            }
            return Ok(None);
        }
        let filename = source
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let record = Record {
            id: state.next_id,
            kind: RecordKind::File,
            item_id: Some(item.id),
            original_filename: Some(filename),
            file_order: None,
        };
        state.next_id += 1;
        state.records.insert(record.id, stored(record.clone(), false, None, Vec::new()));
        Ok(Some(record))
    }

    async fn delete_record(&self, record: &Record) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        state.records.remove(&record.id);
        state.records.retain(|_, r| r.record.item_id != Some(record.id));
        if let Some((registry, remaining)) = state.signal_after_deletes.take() {
            if remaining <= 1 {
                registry.interrupt_all();
            } else {
                state.signal_after_deletes = Some((registry, remaining - 1));
            }
        }
        Ok(())
    }

    async fn find_records(&self, ids: &[i64]) -> Result<Vec<Record>, RepositoryError> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id).map(|r| r.record.clone()))
            .collect())
    }

    async fn find_record_by_filename(&self, filename: &str) -> Result<Option<Record>, RepositoryError> {
        let state = self.state.lock();
        let mut files: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|r| r.record.kind == RecordKind::File)
            .filter(|r| r.record.original_filename.as_deref() == Some(filename))
            .collect();
        files.sort_by_key(|r| r.record.id);
        Ok(files.first().map(|r| r.record.clone()))
    }

    async fn find_record_by_identifier(
        &self,
        kind: Option<RecordKind>,
        field: &IdentifierField,
        value: &str,
    ) -> Result<Option<Record>, RepositoryError> {
        let state = self.state.lock();
        let mut candidates: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|r| kind.map_or(true, |k| r.record.kind == k))
            .filter(|r| match field {
                IdentifierField::InternalId => value.parse::<i64>().ok() == Some(r.record.id),
                IdentifierField::OriginalFilename => r.record.original_filename.as_deref() == Some(value),
                IdentifierField::Element(element) => element_id_of(&element.element_set, &element.name)
                    .map_or(false, |id| r.texts.iter().any(|t| t.element_id == id && t.text == value)),
            })
            .collect();
        candidates.sort_by_key(|r| r.record.id);
        Ok(candidates.first().map(|r| r.record.clone()))
    }

    async fn update_element_texts(
        &self,
        record: &Record,
        entries: &[ElementTextEntry],
        mode: UpdateMode,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        let stored = state
            .records
            .get_mut(&record.id)
            .ok_or_else(|| RepositoryError::Validation(format!("record {} not found", record.id)))?;
        if mode != UpdateMode::Add {
            let replaced: HashSet<i64> = entries.iter().map(|e| e.element_id).collect();
            stored.texts.retain(|t| !replaced.contains(&t.element_id));
        }
        stored
            .texts
            .extend(entries.iter().filter(|e| !e.is_empty()).cloned());
        Ok(())
    }

    async fn set_file_order(&self, file: &Record, order: Option<i32>) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        if let Some(stored) = state.records.get_mut(&file.id) {
            stored.record.file_order = order;
        }
        Ok(())
    }

    async fn find_collection_by_title(&self, title: &str) -> Result<Option<Record>, RepositoryError> {
        let state = self.state.lock();
        let mut matches: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|r| r.record.kind == RecordKind::Collection && title_of(r) == Some(title))
            .collect();
        matches.sort_by_key(|r| r.record.id);
        Ok(matches.first().map(|r| r.record.clone()))
    }

    async fn create_collection(&self, title: &str) -> Result<Record, RepositoryError> {
        let mut state = self.state.lock();
        let record = Record {
            id: state.next_id,
            kind: RecordKind::Collection,
            item_id: None,
            original_filename: None,
            file_order: None,
        };
        state.next_id += 1;
        let texts = vec![ElementTextEntry { element_id: DC_TITLE, text: title.to_string(), html: false }];
        state.records.insert(record.id, stored(record.clone(), false, None, texts));
        Ok(record)
    }
}

#[derive(Default)]
struct StoreState {
    imports: HashMap<Uuid, Import>,
    ledger: Vec<ImportedItem>,
    saves: Vec<Import>,
}

/// Import store double that also keeps a history of every save
#[derive(Default)]
pub struct MemoryImportStore {
    state: Mutex<StoreState>,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots passed to `save_import`, oldest first
    pub fn saves(&self, import_id: Uuid) -> Vec<Import> {
        self.state
            .lock()
            .saves
            .iter()
            .filter(|i| i.id == import_id)
            .cloned()
            .collect()
    }

    pub fn ledger(&self, import_id: Uuid) -> Vec<ImportedItem> {
        self.state
            .lock()
            .ledger
            .iter()
            .filter(|e| e.import_id == import_id)
            .cloned()
            .collect()
    }

    pub fn stored(&self, import_id: Uuid) -> Option<Import> {
        self.state.lock().imports.get(&import_id).cloned()
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn insert_import(&self, import: &Import) -> Result<()> {
        self.state.lock().imports.insert(import.id, import.clone());
        Ok(())
    }

    async fn save_import(&self, import: &Import) -> Result<()> {
        let mut state = self.state.lock();
        state.imports.insert(import.id, import.clone());
        state.saves.push(import.clone());
        Ok(())
    }

    async fn find_import(&self, id: Uuid) -> Result<Option<Import>> {
        Ok(self.state.lock().imports.get(&id).cloned())
    }

    async fn list_imports(&self) -> Result<Vec<Import>> {
        let mut imports: Vec<Import> = self.state.lock().imports.values().cloned().collect();
        imports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(imports)
    }

    async fn next_queued_import(&self) -> Result<Option<Import>> {
        let state = self.state.lock();
        let mut queued: Vec<&Import> = state
            .imports
            .values()
            .filter(|i| {
                matches!(
                    i.status,
                    Some(crate::types::ImportStatus::Queued) | Some(crate::types::ImportStatus::QueuedUndo)
                )
            })
            .collect();
        queued.sort_by_key(|i| i.created_at);
        Ok(queued.first().map(|i| (*i).clone()))
    }

    async fn delete_import(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        state.imports.remove(&id);
        state.ledger.retain(|e| e.import_id != id);
        Ok(())
    }

    async fn mark_abandoned_runs_stopped(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let mut count = 0;
        for import in state.imports.values_mut() {
            if import.is_running() {
                import.status = Some(crate::types::ImportStatus::Stopped);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn record_imported_item(&self, entry: &ImportedItem) -> Result<()> {
        let mut state = self.state.lock();
        let duplicate = state
            .ledger
            .iter()
            .any(|e| e.import_id == entry.import_id && e.item_id == entry.item_id);
        if !duplicate {
            state.ledger.push(entry.clone());
        }
        Ok(())
    }

    async fn find_imported_item_by_source_id(
        &self,
        import_id: Uuid,
        source_item_id: &str,
    ) -> Result<Option<ImportedItem>> {
        Ok(self
            .state
            .lock()
            .ledger
            .iter()
            .find(|e| e.import_id == import_id && e.source_item_id.as_deref() == Some(source_item_id))
            .cloned())
    }

    async fn imported_items_page(&self, import_id: Uuid, limit: i64) -> Result<Vec<ImportedItem>> {
        Ok(self
            .state
            .lock()
            .ledger
            .iter()
            .rev()
            .filter(|e| e.import_id == import_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn delete_imported_items(&self, import_id: Uuid, item_ids: &[i64]) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.ledger.len();
        state
            .ledger
            .retain(|e| !(e.import_id == import_id && item_ids.contains(&e.item_id)));
        Ok((before - state.ledger.len()) as u64)
    }

    async fn count_imported_items(&self, import_id: Uuid) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .ledger
            .iter()
            .filter(|e| e.import_id == import_id)
            .count() as i64)
    }
}
