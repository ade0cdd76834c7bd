//! Document lifecycle across collections.
//!
//! A source document moves `absent -> ingesting -> present`, and from
//! `present` through either `updating -> present` or `deleting -> absent`.
//! Each transition for one `source_id` holds that source's lock for its whole
//! duration, so uploads, updates and deletes of the same document never
//! interleave. Different documents proceed in parallel.
//!
//! The stored chunk metadata is the only catalog: existence, listing and
//! deletion all work by filtering the collections.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::chunker::{Chunker, RowChunker, UnitChunker, WindowChunker};
use super::config::ChunkingConfig;
use super::types::{
    Category, Chunk, ChunkId, ChunkMetadata, Granularity, MetadataValue, derive_source_id,
};
use crate::config::RetrievalMode;
use crate::error::{RagError, RagResult};
use crate::parsing::{DocumentParser, ParseOutcome, ParsedContent, ParsedDocument, ParsedUnit};
use crate::storage::{CollectionRole, CollectionStats, IndexStore, MetadataFilter};
use crate::vector::{EmbedInput, MultimodalEmbedder, VectorLayout};
use crate::{debug_event, log_event};

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    /// Replaces the derived source id.
    pub source_id: Option<String>,
    /// Merged into every chunk's metadata.
    pub extra: BTreeMap<String, MetadataValue>,
}

impl UploadMetadata {
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Chunks written to (or removed from) one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionWrite {
    pub collection: String,
    pub role: CollectionRole,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub source_id: String,
    pub filename: String,
    pub category: Category,
    pub upload_time: String,
    pub collections: Vec<CollectionWrite>,
}

impl UploadReport {
    pub fn total_chunks(&self) -> usize {
        self.collections.iter().map(|c| c.chunks).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub source_id: String,
    pub collections: Vec<CollectionWrite>,
}

impl DeleteReport {
    pub fn total_chunks(&self) -> usize {
        self.collections.iter().map(|c| c.chunks).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    /// What the update removed; `None` when the document was new.
    pub replaced: Option<DeleteReport>,
    pub upload: UploadReport,
}

/// One indexed source document, aggregated from its chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub source_id: String,
    pub filename: String,
    pub category: Category,
    pub upload_time: Option<String>,
    /// Pages, windows and coarse units.
    pub units: usize,
    pub rows: usize,
    pub fragments: usize,
    pub chunks: usize,
    pub collections: BTreeSet<String>,
}

/// Chunks bound for one collection, embedded before anything is written.
struct PlannedWrite {
    role: CollectionRole,
    chunks: Vec<Chunk>,
}

pub struct DocumentManager {
    store: Arc<IndexStore>,
    embedder: Arc<MultimodalEmbedder>,
    parser: Arc<dyn DocumentParser>,
    chunking: ChunkingConfig,
    mode: RetrievalMode,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("mode", &self.mode)
            .field("store", &self.store.root())
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl DocumentManager {
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<MultimodalEmbedder>,
        parser: Arc<dyn DocumentParser>,
        chunking: ChunkingConfig,
        mode: RetrievalMode,
    ) -> RagResult<Self> {
        chunking.validate().map_err(RagError::Config)?;

        let manager = Self {
            store,
            embedder,
            parser,
            chunking,
            mode,
            locks: DashMap::new(),
        };
        for role in manager.write_roles() {
            if manager.store.get(role).is_none() {
                return Err(RagError::InvalidInput(format!(
                    "{} mode needs the {role} collection; configure an image model",
                    mode.as_str()
                )));
            }
        }
        Ok(manager)
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Collections written to in the current mode.
    fn write_roles(&self) -> Vec<CollectionRole> {
        match self.mode {
            RetrievalMode::Parallel => vec![CollectionRole::Paged, CollectionRole::Tabular],
            RetrievalMode::Cascaded => vec![CollectionRole::Units, CollectionRole::Fragments],
        }
    }

    fn target_roles(&self, category: Category) -> Vec<CollectionRole> {
        match (self.mode, category) {
            (RetrievalMode::Parallel, Category::Paged) => vec![CollectionRole::Paged],
            (RetrievalMode::Parallel, Category::Tabular) => vec![CollectionRole::Tabular],
            (RetrievalMode::Cascaded, _) => vec![CollectionRole::Units, CollectionRole::Fragments],
        }
    }

    /// Run `op` holding the lock for `source_id`. The entry is dropped again
    /// once no other caller holds it.
    fn locked<T>(&self, source_id: &str, op: impl FnOnce() -> RagResult<T>) -> RagResult<T> {
        let lock = self
            .locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            op()
        };
        drop(lock);
        self.locks
            .remove_if(source_id, |_, held| Arc::strong_count(held) == 1);
        result
    }

    /// Index a new document.
    pub fn upload(&self, path: &Path, metadata: UploadMetadata) -> RagResult<UploadReport> {
        let (filename, category) = identify(path)?;
        let source_id = resolve_source_id(&filename, category, metadata.source_id.as_deref())?;

        self.locked(&source_id, || {
            self.upload_inner(path, &filename, category, &source_id, &metadata)
        })
    }

    /// Replace a document: delete whatever is indexed for it, then upload.
    pub fn update(&self, path: &Path, metadata: UploadMetadata) -> RagResult<UpdateReport> {
        let (filename, category) = identify(path)?;

        // Without an override, keep the id the file was first indexed under.
        let source_id = match metadata.source_id.as_deref() {
            Some(id) => resolve_source_id(&filename, category, Some(id))?,
            None => match self.sources_for_filename(&filename)?.into_iter().next() {
                Some(existing) => existing,
                None => derive_source_id(&filename, category),
            },
        };

        self.locked(&source_id, || {
            let replaced = match self.delete_inner(&source_id) {
                Ok(report) => Some(report),
                Err(RagError::NotFound(_)) => {
                    debug_event!("documents", "update", "{source_id} not indexed yet, uploading");
                    None
                }
                Err(e) => return Err(e),
            };

            let upload = self.upload_inner(path, &filename, category, &source_id, &metadata)?;
            log_event!("documents", "updated", "{source_id} ({} chunks)", upload.total_chunks());
            Ok(UpdateReport { replaced, upload })
        })
    }

    /// Remove every chunk of a source from every collection.
    pub fn delete(&self, source_id: &str) -> RagResult<DeleteReport> {
        self.locked(source_id, || self.delete_inner(source_id))
    }

    /// Delete by original filename. Every source stored under it is removed.
    pub fn delete_by_filename(&self, filename: &str) -> RagResult<Vec<DeleteReport>> {
        let sources = self.sources_for_filename(filename)?;
        if sources.is_empty() {
            return Err(RagError::NotFound(format!("no document named '{filename}'")));
        }
        sources.iter().map(|id| self.delete(id)).collect()
    }

    /// Every indexed document, ordered by filename.
    pub fn list(&self) -> RagResult<Vec<DocumentSummary>> {
        let mut documents: BTreeMap<String, DocumentSummary> = BTreeMap::new();

        for (role, collection) in self.store.iter() {
            for metadata in collection.list_by_filter(&MetadataFilter::all())? {
                let summary = documents
                    .entry(metadata.source_id.clone())
                    .or_insert_with(|| DocumentSummary {
                        source_id: metadata.source_id.clone(),
                        filename: metadata.filename.clone(),
                        category: metadata.category,
                        ..DocumentSummary::default()
                    });

                if summary.filename.is_empty() {
                    summary.filename = metadata.filename.clone();
                }
                if let Some(time) = &metadata.upload_time {
                    if summary.upload_time.as_ref().is_none_or(|t| time < t) {
                        summary.upload_time = Some(time.clone());
                    }
                }

                summary.chunks += 1;
                if metadata.granularity == Granularity::Row {
                    summary.rows += 1;
                } else if metadata.fragment_index.is_some() {
                    summary.fragments += 1;
                } else if matches!(role, CollectionRole::Paged | CollectionRole::Units) {
                    summary.units += 1;
                }
                summary.collections.insert(collection.name().to_string());
            }
        }

        let mut out: Vec<DocumentSummary> = documents.into_values().collect();
        out.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(out)
    }

    pub fn stats(&self) -> RagResult<Vec<CollectionStats>> {
        Ok(self.store.stats()?)
    }

    /// Empty every collection.
    pub fn reset(&self) -> RagResult<usize> {
        let removed = self.store.reset()?;
        self.locks.clear();
        log_event!("documents", "reset", "{removed} chunks removed");
        Ok(removed)
    }

    fn upload_inner(
        &self,
        path: &Path,
        filename: &str,
        category: Category,
        source_id: &str,
        metadata: &UploadMetadata,
    ) -> RagResult<UploadReport> {
        let roles = self.target_roles(category);
        self.ensure_absent(&roles, filename, source_id)?;

        let document = match self.parser.parse(path)? {
            ParseOutcome::Ready(document) => document,
            ParseOutcome::Pending { .. } => {
                return Err(RagError::ParseFailure(format!(
                    "{filename}: parser has not finished"
                )));
            }
        };

        let upload_time = chrono::Utc::now().to_rfc3339();
        let mut base = ChunkMetadata::for_source(source_id, filename, category)
            .with_upload_time(upload_time.clone());
        base.extra.extend(metadata.extra.clone());

        let plan = self.plan(&document, category, &base);
        if plan.iter().all(|w| w.chunks.is_empty()) {
            return Err(RagError::ParseFailure(format!(
                "{filename}: no content to index"
            )));
        }

        // Embed everything first; a failure here leaves the index untouched.
        let mut embedded = Vec::with_capacity(plan.len());
        for write in plan {
            let embeddings = self.embed_chunks(&write)?;
            embedded.push((write, embeddings));
        }

        let mut written: Vec<(CollectionRole, Vec<ChunkId>)> = Vec::new();
        let mut report = Vec::new();
        for (write, embeddings) in &embedded {
            let collection = self.store.collection(write.role)?;
            match collection.insert_chunks(&write.chunks, embeddings) {
                Ok(count) => {
                    written.push((write.role, write.chunks.iter().map(|c| c.id.clone()).collect()));
                    report.push(CollectionWrite {
                        collection: collection.name().to_string(),
                        role: write.role,
                        chunks: count,
                    });
                }
                Err(e) if written.is_empty() => return Err(e.into()),
                Err(e) => {
                    self.roll_back(&written);
                    return Err(RagError::IndexFailure(format!(
                        "writing {source_id} to '{}' failed, earlier writes rolled back: {e}",
                        collection.name()
                    )));
                }
            }
        }

        let report = UploadReport {
            source_id: source_id.to_string(),
            filename: filename.to_string(),
            category,
            upload_time,
            collections: report,
        };
        log_event!("documents", "uploaded", "{source_id} ({} chunks)", report.total_chunks());
        Ok(report)
    }

    /// Fail with `DuplicateDocument` if the file or source id is already indexed.
    fn ensure_absent(&self, roles: &[CollectionRole], filename: &str, source_id: &str) -> RagResult<()> {
        for role in roles {
            let collection = self.store.collection(*role)?;

            let by_name = collection.list_by_filter(&MetadataFilter::file(filename))?;
            if let Some(existing) = by_name.first() {
                return Err(RagError::DuplicateDocument {
                    filename: filename.to_string(),
                    source_id: existing.source_id.clone(),
                });
            }
            if collection.count_matching(&MetadataFilter::source(source_id))? > 0 {
                return Err(RagError::DuplicateDocument {
                    filename: filename.to_string(),
                    source_id: source_id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Decide which chunks go to which collection.
    fn plan(&self, document: &ParsedDocument, category: Category, base: &ChunkMetadata) -> Vec<PlannedWrite> {
        let window = WindowChunker::new(self.chunking.clone());

        match (self.mode, category) {
            (RetrievalMode::Parallel, Category::Tabular) => vec![PlannedWrite {
                role: CollectionRole::Tabular,
                chunks: RowChunker::new().chunk(&table_text(document), base),
            }],
            (RetrievalMode::Parallel, Category::Paged) => {
                let chunks = match &document.content {
                    ParsedContent::Units(units) => UnitChunker::pages().chunk_units(units, base),
                    ParsedContent::Markdown(text) => window.chunk(text, base),
                };
                vec![PlannedWrite {
                    role: CollectionRole::Paged,
                    chunks,
                }]
            }
            (RetrievalMode::Cascaded, Category::Paged) => {
                let units = match &document.content {
                    ParsedContent::Units(units) => units.clone(),
                    ParsedContent::Markdown(text) => vec![ParsedUnit::text(text.clone())],
                };
                let coarse = UnitChunker::cases().chunk_units(&units, base);
                let fine = coarse.iter().flat_map(|unit| window.fragments(unit)).collect();
                vec![
                    PlannedWrite {
                        role: CollectionRole::Units,
                        chunks: coarse,
                    },
                    PlannedWrite {
                        role: CollectionRole::Fragments,
                        chunks: fine,
                    },
                ]
            }
            (RetrievalMode::Cascaded, Category::Tabular) => {
                // The whole table is the coarse unit; its rows are the fragments.
                let mut rows = RowChunker::new().chunk(&table_text(document), base);
                if rows.is_empty() {
                    return Vec::new();
                }

                let unit_id = ChunkId::unit(&base.source_id, 1);
                let mut unit_metadata = base.clone().with_granularity(Granularity::Case);
                unit_metadata.unit_index = Some(1);
                unit_metadata.unit_id = Some(unit_id.as_str().to_string());
                unit_metadata.total_rows = Some(rows.len() as u32);
                if let Some(columns) = rows[0].metadata.extra.get("columns") {
                    unit_metadata.extra.insert("columns".to_string(), columns.clone());
                }
                let content = rows
                    .iter()
                    .map(|r| r.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let unit = Chunk::new(unit_id.clone(), content, unit_metadata);

                for row in &mut rows {
                    row.metadata.unit_id = Some(unit_id.as_str().to_string());
                    row.metadata.unit_index = Some(1);
                }

                vec![
                    PlannedWrite {
                        role: CollectionRole::Units,
                        chunks: vec![unit],
                    },
                    PlannedWrite {
                        role: CollectionRole::Fragments,
                        chunks: rows,
                    },
                ]
            }
        }
    }

    fn embed_chunks(&self, write: &PlannedWrite) -> RagResult<Vec<Vec<f32>>> {
        if write.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let layout = write.role.layout();
        let inputs: Vec<EmbedInput<'_>> = write
            .chunks
            .iter()
            .map(|chunk| {
                let image = match layout {
                    VectorLayout::TextImage => chunk.metadata.image_path.as_deref().map(Path::new),
                    VectorLayout::Text => None,
                };
                EmbedInput::new(Some(&chunk.content), image)
            })
            .collect();

        debug_event!("documents", "embedding", "{} chunks for {}", inputs.len(), write.role);
        Ok(self.embedder.embed_inputs(&inputs, layout)?)
    }

    fn roll_back(&self, written: &[(CollectionRole, Vec<ChunkId>)]) {
        for (role, ids) in written {
            let Some(collection) = self.store.get(*role) else {
                continue;
            };
            if let Err(e) = collection.delete(ids) {
                tracing::error!(
                    target: "documents",
                    "Rollback of {} chunks in '{}' failed: {e}",
                    ids.len(),
                    collection.name()
                );
            }
        }
    }

    fn delete_inner(&self, source_id: &str) -> RagResult<DeleteReport> {
        let filter = MetadataFilter::source(source_id);
        let mut removed = Vec::new();
        let mut failed = Vec::new();

        for (role, collection) in self.store.iter() {
            match collection.delete_by_filter(&filter) {
                Ok(0) => {}
                Ok(chunks) => removed.push(CollectionWrite {
                    collection: collection.name().to_string(),
                    role,
                    chunks,
                }),
                Err(e) => {
                    tracing::error!(target: "documents", "Deleting {source_id} from '{}' failed: {e}", collection.name());
                    failed.push(format!("{}: {e}", collection.name()));
                }
            }
        }

        if !failed.is_empty() {
            if removed.is_empty() {
                return Err(RagError::IndexFailure(format!(
                    "deleting {source_id} failed: {}",
                    failed.join("; ")
                )));
            }
            return Err(RagError::PartialConsistency {
                succeeded: removed.iter().map(|w| w.collection.clone()).collect(),
                failed,
            });
        }

        if removed.is_empty() {
            return Err(RagError::NotFound(format!("document {source_id}")));
        }

        let report = DeleteReport {
            source_id: source_id.to_string(),
            collections: removed,
        };
        log_event!("documents", "deleted", "{source_id} ({} chunks)", report.total_chunks());
        Ok(report)
    }

    fn sources_for_filename(&self, filename: &str) -> RagResult<BTreeSet<String>> {
        let mut sources = BTreeSet::new();
        for (_, collection) in self.store.iter() {
            for metadata in collection.list_by_filter(&MetadataFilter::file(filename))? {
                sources.insert(metadata.source_id);
            }
        }
        Ok(sources)
    }
}

/// Filename and category of an upload path.
fn identify(path: &Path) -> RagResult<(String, Category)> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RagError::InvalidInput(format!("not a file path: {}", path.display())))?
        .to_string();

    let category = Category::from_path(path).ok_or_else(|| {
        RagError::InvalidInput(format!("unsupported file type: {filename}"))
    })?;

    if !path.is_file() {
        return Err(RagError::InvalidInput(format!("file not found: {}", path.display())));
    }

    Ok((filename, category))
}

fn resolve_source_id(filename: &str, category: Category, requested: Option<&str>) -> RagResult<String> {
    match requested.map(str::trim) {
        Some("") => Err(RagError::InvalidInput("source_id must not be empty".to_string())),
        Some(id) => Ok(id.to_string()),
        None => Ok(derive_source_id(filename, category)),
    }
}

/// Markdown table text of a tabular document.
fn table_text(document: &ParsedDocument) -> String {
    match &document.content {
        ParsedContent::Markdown(text) => text.clone(),
        ParsedContent::Units(units) => units
            .iter()
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::documents::config::CollectionsConfig;
    use crate::parsing::{LocalParser, ParseError};
    use crate::vector::{HashedImageGenerator, HashedTokenGenerator, VectorDimension};
    use tempfile::TempDir;

    fn embedder() -> Arc<MultimodalEmbedder> {
        let dim = VectorDimension::new(64).unwrap();
        Arc::new(
            MultimodalEmbedder::new(Arc::new(HashedTokenGenerator::new(dim)))
                .with_image(Arc::new(HashedImageGenerator::new(dim))),
        )
    }

    fn manager_with(dir: &Path, mode: RetrievalMode, parser: Arc<dyn DocumentParser>) -> DocumentManager {
        let embedder = embedder();
        let store = IndexStore::open(
            dir.join("index"),
            &CollectionRole::ALL,
            &CollectionsConfig::default(),
            &StorageConfig::default(),
            |layout| embedder.dimension(layout).ok(),
        )
        .unwrap();
        DocumentManager::new(
            Arc::new(store),
            embedder,
            parser,
            ChunkingConfig {
                chunk_size: 40,
                chunk_overlap: 5,
                boundary_lookback: 20,
            },
            mode,
        )
        .unwrap()
    }

    fn manager(dir: &Path, mode: RetrievalMode) -> DocumentManager {
        manager_with(dir, mode, Arc::new(LocalParser::new()))
    }

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn count(m: &DocumentManager, role: CollectionRole) -> usize {
        m.store.collection(role).unwrap().count().unwrap()
    }

    #[test]
    fn test_csv_upload_parallel() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let path = write(dir.path(), "people.csv", "name,age\nAlice,30\nBob,40\n");

        let report = m.upload(&path, UploadMetadata::default()).unwrap();
        assert_eq!(report.category, Category::Tabular);
        assert_eq!(report.total_chunks(), 2);
        assert_eq!(report.collections[0].role, CollectionRole::Tabular);
        assert_eq!(count(&m, CollectionRole::Tabular), 2);
        assert_eq!(count(&m, CollectionRole::Paged), 0);
    }

    #[test]
    fn test_duplicate_leaves_collections_unchanged() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let path = write(dir.path(), "people.csv", "name,age\nAlice,30\n");

        m.upload(&path, UploadMetadata::default()).unwrap();
        let err = m.upload(&path, UploadMetadata::default()).unwrap_err();
        assert!(matches!(err, RagError::DuplicateDocument { .. }));
        assert_eq!(count(&m, CollectionRole::Tabular), 1);
    }

    #[test]
    fn test_upload_metadata_override_and_extra() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let path = write(dir.path(), "notes.md", "# One\nfirst\n# Two\nsecond\n");

        let report = m
            .upload(
                &path,
                UploadMetadata::default()
                    .with_source_id("handbook")
                    .with_extra("owner", "legal"),
            )
            .unwrap();
        assert_eq!(report.source_id, "handbook");

        let stored = m
            .store
            .collection(CollectionRole::Paged)
            .unwrap()
            .list_by_filter(&MetadataFilter::source("handbook"))
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|m| m.extra.get("owner") == Some(&MetadataValue::from("legal"))));
        assert!(stored.iter().any(|m| m.page == Some(2)));
    }

    #[test]
    fn test_delete_restores_counts() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let csv = write(dir.path(), "people.csv", "name,age\nAlice,30\n");
        let md = write(dir.path(), "notes.md", "# One\nfirst\n# Two\nsecond\n");

        m.upload(&csv, UploadMetadata::default()).unwrap();
        let before = count(&m, CollectionRole::Paged);
        let report = m.upload(&md, UploadMetadata::default()).unwrap();

        let deleted = m.delete(&report.source_id).unwrap();
        assert_eq!(deleted.total_chunks(), report.total_chunks());
        assert_eq!(count(&m, CollectionRole::Paged), before);
        assert_eq!(m.list().unwrap().len(), 1);

        assert!(matches!(m.delete(&report.source_id), Err(RagError::NotFound(_))));
    }

    #[test]
    fn test_update_replaces_and_degrades_to_upload() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let path = write(dir.path(), "people.csv", "name,age\nAlice,30\n");

        let fresh = m.update(&path, UploadMetadata::default()).unwrap();
        assert!(fresh.replaced.is_none());

        write(dir.path(), "people.csv", "name,age\nAlice,31\nBob,40\nCarol,50\n");
        let updated = m.update(&path, UploadMetadata::default()).unwrap();
        assert_eq!(updated.replaced.unwrap().total_chunks(), 1);
        assert_eq!(updated.upload.source_id, fresh.upload.source_id);
        assert_eq!(count(&m, CollectionRole::Tabular), 3);
    }

    #[test]
    fn test_cascaded_layout_links_fragments() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Cascaded);
        let path = write(
            dir.path(),
            "cases.md",
            "# Case A\nThe patient reported a persistent fever. Labs were normal.\n# Case B\nA fractured wrist after a fall.\n",
        );

        let report = m.upload(&path, UploadMetadata::default()).unwrap();
        assert_eq!(report.collections.len(), 2);

        let units = m
            .store
            .collection(CollectionRole::Units)
            .unwrap()
            .list_by_filter(&MetadataFilter::all())
            .unwrap();
        assert_eq!(units.len(), 2);

        let fragments = m
            .store
            .collection(CollectionRole::Fragments)
            .unwrap()
            .list_by_filter(&MetadataFilter::all())
            .unwrap();
        assert!(!fragments.is_empty());
        let unit_ids: BTreeSet<_> = units.iter().filter_map(|u| u.unit_id.clone()).collect();
        assert!(fragments
            .iter()
            .all(|f| f.unit_id.as_ref().is_some_and(|id| unit_ids.contains(id))));
    }

    #[test]
    fn test_cascaded_tabular_rows_are_fragments() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Cascaded);
        let path = write(dir.path(), "people.csv", "name,age\nAlice,30\nBob,40\n");

        m.upload(&path, UploadMetadata::default()).unwrap();
        assert_eq!(count(&m, CollectionRole::Units), 1);
        assert_eq!(count(&m, CollectionRole::Fragments), 2);

        let rows = m
            .store
            .collection(CollectionRole::Fragments)
            .unwrap()
            .list_by_filter(&MetadataFilter::all())
            .unwrap();
        assert!(rows.iter().all(|r| r.granularity == Granularity::Row));
        assert!(rows.iter().all(|r| r.unit_id.as_deref().is_some_and(|u| u.ends_with("_unit_1"))));
    }

    #[test]
    fn test_parse_failure_writes_nothing() {
        struct Broken;
        impl DocumentParser for Broken {
            fn parse(&self, _path: &Path) -> Result<ParseOutcome, ParseError> {
                Err(ParseError::Service("upstream unavailable".to_string()))
            }
        }

        let dir = TempDir::new().unwrap();
        let m = manager_with(dir.path(), RetrievalMode::Parallel, Arc::new(Broken));
        let path = write(dir.path(), "report.md", "anything");

        let err = m.upload(&path, UploadMetadata::default()).unwrap_err();
        assert!(matches!(err, RagError::ParseFailure(_)));
        assert!(m.list().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_inputs() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);

        let pptx = write(dir.path(), "deck.pptx", "x");
        assert!(matches!(
            m.upload(&pptx, UploadMetadata::default()),
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            m.upload(&dir.path().join("missing.csv"), UploadMetadata::default()),
            Err(RagError::InvalidInput(_))
        ));

        let csv = write(dir.path(), "a.csv", "h\n1\n");
        assert!(matches!(
            m.upload(&csv, UploadMetadata::default().with_source_id("  ")),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_list_aggregates_per_source() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        m.upload(&write(dir.path(), "b.csv", "k,v\n1,2\n3,4\n"), UploadMetadata::default())
            .unwrap();
        m.upload(&write(dir.path(), "a.md", "# P1\none\n# P2\ntwo\n"), UploadMetadata::default())
            .unwrap();

        let docs = m.list().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].filename, "a.md");
        assert_eq!(docs[0].units, 2);
        assert_eq!(docs[1].rows, 2);
        assert!(docs[1].upload_time.is_some());
    }

    #[test]
    fn test_delete_by_filename() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        m.upload(&write(dir.path(), "a.csv", "k\n1\n"), UploadMetadata::default())
            .unwrap();

        let reports = m.delete_by_filename("a.csv").unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(m.delete_by_filename("a.csv"), Err(RagError::NotFound(_))));
    }

    #[test]
    fn test_source_locks_are_released() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Parallel);
        let path = write(dir.path(), "a.csv", "k\n1\n");

        let report = m.upload(&path, UploadMetadata::default()).unwrap();
        assert!(m.locks.is_empty());
        m.update(&path, UploadMetadata::default()).unwrap();
        assert!(m.locks.is_empty());
        m.delete(&report.source_id).unwrap();
        assert!(m.locks.is_empty());
        assert!(m.delete(&report.source_id).is_err());
        assert!(m.locks.is_empty());
    }

    #[test]
    fn test_failed_second_write_rolls_back_first() {
        let dir = TempDir::new().unwrap();
        let m = manager(dir.path(), RetrievalMode::Cascaded);

        // Occupy the id the second row of people.csv will get.
        let source_id = derive_source_id("people.csv", Category::Tabular);
        let squatter = Chunk::new(
            ChunkId::row(&source_id, 2),
            "unrelated",
            ChunkMetadata::for_source("other", "other.csv", Category::Tabular),
        );
        m.store
            .collection(CollectionRole::Fragments)
            .unwrap()
            .insert_chunks(&[squatter], &[vec![1.0; 64]])
            .unwrap();

        let path = write(dir.path(), "people.csv", "name,age\nAlice,30\nBob,40\n");
        let err = m.upload(&path, UploadMetadata::default()).unwrap_err();
        assert!(matches!(err, RagError::IndexFailure(_)), "{err:?}");
        assert_eq!(count(&m, CollectionRole::Units), 0);
        assert_eq!(count(&m, CollectionRole::Fragments), 1);
        assert!(m.locks.is_empty());
    }

    /// Take the tantivy writer lock of a collection from outside the manager.
    fn hold_writer(m: &DocumentManager, role: CollectionRole) -> tantivy::IndexWriter<tantivy::TantivyDocument> {
        let path = m.store.collection(role).unwrap().path().join("tantivy");
        let index = tantivy::Index::open_in_dir(path).unwrap();
        index.writer_with_num_threads(1, 15_000_000).unwrap()
    }

    /// Index `case.md` in cascaded mode, then reopen so no writer is cached.
    fn indexed_case(dir: &Path) -> (DocumentManager, String) {
        let path = write(
            dir,
            "case.md",
            "# Case 1\nFemur fracture with displacement.\n# Case 2\nClavicle fracture, healed.\n",
        );
        let source_id = {
            let m = manager(dir, RetrievalMode::Cascaded);
            m.upload(&path, UploadMetadata::default()).unwrap().source_id
        };
        (manager(dir, RetrievalMode::Cascaded), source_id)
    }

    #[test]
    fn test_delete_reports_partial_consistency() {
        let dir = TempDir::new().unwrap();
        let (m, source_id) = indexed_case(dir.path());
        let fragments_before = count(&m, CollectionRole::Fragments);
        assert!(fragments_before > 0);

        let _held = hold_writer(&m, CollectionRole::Fragments);
        let err = m.delete(&source_id).unwrap_err();
        let RagError::PartialConsistency { succeeded, failed } = err else {
            panic!("expected PartialConsistency, got {err:?}");
        };
        let units_name = m.store.collection(CollectionRole::Units).unwrap().name().to_string();
        let fragments_name = m
            .store
            .collection(CollectionRole::Fragments)
            .unwrap()
            .name()
            .to_string();
        assert_eq!(succeeded, vec![units_name]);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with(&format!("{fragments_name}: ")));

        assert_eq!(count(&m, CollectionRole::Units), 0);
        assert_eq!(count(&m, CollectionRole::Fragments), fragments_before);
    }

    #[test]
    fn test_delete_everywhere_failed_is_index_failure() {
        let dir = TempDir::new().unwrap();
        let (m, source_id) = indexed_case(dir.path());
        let units_before = count(&m, CollectionRole::Units);
        let fragments_before = count(&m, CollectionRole::Fragments);

        let _units = hold_writer(&m, CollectionRole::Units);
        let _fragments = hold_writer(&m, CollectionRole::Fragments);
        let err = m.delete(&source_id).unwrap_err();
        assert!(matches!(err, RagError::IndexFailure(_)), "{err:?}");

        assert_eq!(count(&m, CollectionRole::Units), units_before);
        assert_eq!(count(&m, CollectionRole::Fragments), fragments_before);
    }
}
