//! A single persisted chunk collection.
//!
//! Layout on disk:
//!
//! ```text
//! <index_path>/<name>/
//!   collection.json   manifest (dimension, layout, granularity)
//!   tantivy/          chunk documents
//! ```
//!
//! Similarity search is exact: every document passing the filter is scored
//! by cosine distance against the query embedding.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, TantivyDocument as Document,
    Term,
};

use super::error::{StorageError, StorageResult};
use super::filter::MetadataFilter;
use super::schema::CollectionSchema;
use crate::config::StorageConfig;
use crate::documents::types::{Chunk, ChunkId, ChunkMetadata, Granularity};
use crate::vector::math::{cosine_distance, display_similarity, from_le_bytes, to_le_bytes};
use crate::vector::{VectorDimension, VectorLayout};

const MANIFEST_FILE: &str = "collection.json";

/// What a collection is created with. Persisted as its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Nominal granularity of the chunks it holds.
    pub granularity: Granularity,
    pub layout: VectorLayout,
    pub dimension: VectorDimension,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    #[serde(flatten)]
    spec: CollectionSpec,
    created_at: String,
}

/// One similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub chunk_id: ChunkId,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query; smaller is closer.
    pub distance: f32,
}

impl QueryHit {
    pub fn similarity(&self) -> f32 {
        display_similarity(self.distance)
    }
}

pub struct Collection {
    spec: CollectionSpec,
    path: PathBuf,
    index: Index,
    reader: IndexReader,
    schema: CollectionSchema,
    writer: Mutex<Option<IndexWriter<Document>>>,
    heap_size: usize,
    page_size: usize,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.spec.name)
            .field("path", &self.path)
            .field("dimension", &self.spec.dimension.get())
            .field("layout", &self.spec.layout)
            .finish()
    }
}

impl Collection {
    /// Open the collection at `path`, creating it when absent.
    ///
    /// An existing collection must have been created with the same dimension
    /// and layout.
    pub fn open(
        path: impl AsRef<Path>,
        spec: CollectionSpec,
        storage: &StorageConfig,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        Self::check_manifest(&path, &spec)?;

        let index_path = path.join("tantivy");
        std::fs::create_dir_all(&index_path)?;

        let (tantivy_schema, schema) = CollectionSchema::build();
        let existing = index_path.join("meta.json").exists();

        let index = if existing {
            Index::open_in_dir(&index_path)?
        } else {
            let dir = MmapDirectory::open(&index_path)?;
            Index::create(dir, tantivy_schema, IndexSettings::default())?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        if existing {
            reader.reload()?;
        }

        tracing::debug!(
            target: "storage",
            "Opened collection '{}' at {} (dimension {})",
            spec.name,
            path.display(),
            spec.dimension.get()
        );

        Ok(Self {
            spec,
            path,
            index,
            reader,
            schema,
            writer: Mutex::new(None),
            heap_size: storage.writer_heap_bytes,
            page_size: storage.page_size.max(1),
        })
    }

    fn check_manifest(path: &Path, spec: &CollectionSpec) -> StorageResult<()> {
        let manifest_path = path.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            let manifest = Manifest {
                spec: spec.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            let json = serde_json::to_string_pretty(&manifest)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            std::fs::write(&manifest_path, json)?;
            return Ok(());
        }

        let raw = std::fs::read_to_string(&manifest_path)?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))?;

        if manifest.spec.dimension != spec.dimension {
            return Err(StorageError::ManifestMismatch {
                collection: spec.name.clone(),
                reason: format!(
                    "created with dimension {}, embedder produces {}",
                    manifest.spec.dimension.get(),
                    spec.dimension.get()
                ),
            });
        }
        if manifest.spec.layout != spec.layout {
            return Err(StorageError::ManifestMismatch {
                collection: spec.name.clone(),
                reason: format!(
                    "created with layout {:?}, configured {:?}",
                    manifest.spec.layout, spec.layout
                ),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension.get()
    }

    pub fn layout(&self) -> VectorLayout {
        self.spec.layout
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a batch of chunks. All-or-nothing.
    ///
    /// Returns the number of chunks written.
    pub fn insert(
        &self,
        ids: &[ChunkId],
        contents: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> StorageResult<usize> {
        if ids.len() != contents.len()
            || ids.len() != embeddings.len()
            || ids.len() != metadatas.len()
        {
            return Err(StorageError::LengthMismatch {
                ids: ids.len(),
                contents: contents.len(),
                embeddings: embeddings.len(),
                metadatas: metadatas.len(),
            });
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(id.as_str()) {
                return Err(StorageError::DuplicateId(id.to_string()));
            }
        }
        for embedding in embeddings {
            self.check_dimension(embedding.len())?;
        }

        // Hold the writer for the whole batch so concurrent inserts cannot
        // both pass the existence check.
        let mut writer_guard = self.writer.lock();

        let searcher = self.reader.searcher();
        for id in ids {
            let query = TermQuery::new(
                Term::from_field_text(self.schema.chunk_id, id.as_str()),
                IndexRecordOption::Basic,
            );
            if searcher.search(&query, &Count)? > 0 {
                return Err(StorageError::DuplicateId(id.to_string()));
            }
        }

        let mut docs = Vec::with_capacity(ids.len());
        for (((id, content), embedding), metadata) in
            ids.iter().zip(contents).zip(embeddings).zip(metadatas)
        {
            docs.push(self.build_document(id, content, embedding, metadata)?);
        }

        let writer = self.ensure_writer(&mut writer_guard)?;
        for doc in docs {
            if let Err(e) = writer.add_document(doc) {
                writer.rollback()?;
                return Err(e.into());
            }
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::debug!(target: "storage", "Inserted {} chunks into '{}'", ids.len(), self.spec.name);
        Ok(ids.len())
    }

    /// Insert chunks with embeddings in matching order.
    pub fn insert_chunks(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> StorageResult<usize> {
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let metadatas: Vec<ChunkMetadata> = chunks.iter().map(|c| c.metadata.clone()).collect();
        self.insert(&ids, &contents, embeddings, &metadatas)
    }

    fn build_document(
        &self,
        id: &ChunkId,
        content: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> StorageResult<Document> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut doc = Document::new();
        doc.add_text(self.schema.chunk_id, id.as_str());
        doc.add_text(self.schema.source_id, &metadata.source_id);
        doc.add_text(self.schema.filename, &metadata.filename);
        if let Some(unit_id) = &metadata.unit_id {
            doc.add_text(self.schema.unit_id, unit_id);
        }
        doc.add_text(self.schema.granularity, metadata.granularity.as_str());
        doc.add_text(self.schema.category, metadata.category.as_str());
        doc.add_text(self.schema.content, content);
        doc.add_text(self.schema.metadata, &metadata_json);
        doc.add_bytes(self.schema.embedding, to_le_bytes(embedding).as_slice());
        doc.add_u64(
            self.schema.indexed_at,
            chrono::Utc::now().timestamp().max(0) as u64,
        );
        Ok(doc)
    }

    /// Nearest chunks to `embedding` among those matching `filter`.
    ///
    /// Ordered by ascending distance, ties by chunk id. At most `k` hits.
    pub fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> StorageResult<Vec<QueryHit>> {
        self.check_dimension(embedding.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        self.scan(filter, |doc| {
            let chunk_id = ChunkId::new(self.text(doc, self.schema.chunk_id).unwrap_or_default());
            let stored = doc
                .get_first(self.schema.embedding)
                .and_then(|v| v.as_bytes())
                .and_then(from_le_bytes)
                .ok_or_else(|| StorageError::InvalidFieldValue {
                    field: "embedding".to_string(),
                    reason: format!("unreadable embedding for '{chunk_id}'"),
                })?;

            hits.push(QueryHit {
                distance: cosine_distance(embedding, &stored),
                content: self.text(doc, self.schema.content).unwrap_or_default(),
                metadata: self.stored_metadata(doc),
                chunk_id,
            });
            Ok(())
        })?;

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Delete chunks by id. Returns how many existed.
    pub fn delete(&self, ids: &[ChunkId]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut writer_guard = self.writer.lock();
        let searcher = self.reader.searcher();

        let mut removed = 0;
        let mut terms = Vec::with_capacity(ids.len());
        for id in ids {
            let term = Term::from_field_text(self.schema.chunk_id, id.as_str());
            let query = TermQuery::new(term.clone(), IndexRecordOption::Basic);
            let found = searcher.search(&query, &Count)?;
            if found > 0 {
                removed += found;
                terms.push(term);
            }
        }

        if removed == 0 {
            return Ok(0);
        }

        let writer = self.ensure_writer(&mut writer_guard)?;
        for term in terms {
            writer.delete_term(term);
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::debug!(target: "storage", "Deleted {removed} chunks from '{}'", self.spec.name);
        Ok(removed)
    }

    /// Delete every chunk matching a non-empty filter. Returns how many.
    pub fn delete_by_filter(&self, filter: &MetadataFilter) -> StorageResult<usize> {
        if filter.is_empty() {
            return Err(StorageError::InvalidFilter(
                "refusing to delete with an empty filter; use reset".to_string(),
            ));
        }

        let mut writer_guard = self.writer.lock();
        let query = filter.to_query(&self.schema);
        let matched = self.reader.searcher().search(&query, &Count)?;
        if matched == 0 {
            return Ok(0);
        }

        let writer = self.ensure_writer(&mut writer_guard)?;
        writer.delete_query(query)?;
        writer.commit()?;
        self.reader.reload()?;

        tracing::debug!(target: "storage", "Deleted {matched} chunks from '{}' by filter", self.spec.name);
        Ok(matched)
    }

    /// Drop every chunk. Returns how many were removed.
    pub fn reset(&self) -> StorageResult<usize> {
        let mut writer_guard = self.writer.lock();
        let total = self.count()?;

        let writer = self.ensure_writer(&mut writer_guard)?;
        writer.delete_all_documents()?;
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!(target: "storage", "Reset collection '{}' ({total} chunks)", self.spec.name);
        Ok(total)
    }

    pub fn count(&self) -> StorageResult<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    /// Number of chunks matching `filter`.
    pub fn count_matching(&self, filter: &MetadataFilter) -> StorageResult<usize> {
        let query = filter.to_query(&self.schema);
        Ok(self.reader.searcher().search(&query, &Count)?)
    }

    /// Metadata of every chunk matching `filter`.
    pub fn list_by_filter(&self, filter: &MetadataFilter) -> StorageResult<Vec<ChunkMetadata>> {
        let mut out = Vec::new();
        self.scan(filter, |doc| {
            out.push(self.stored_metadata(doc));
            Ok(())
        })?;
        Ok(out)
    }

    /// Chunk ids of every chunk matching `filter`.
    pub fn ids_by_filter(&self, filter: &MetadataFilter) -> StorageResult<Vec<ChunkId>> {
        let mut out = Vec::new();
        self.scan(filter, |doc| {
            if let Some(id) = self.text(doc, self.schema.chunk_id) {
                out.push(ChunkId::new(id));
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Visit every matching document, one page at a time, on one snapshot.
    fn scan<F>(&self, filter: &MetadataFilter, mut visit: F) -> StorageResult<()>
    where
        F: FnMut(&Document) -> StorageResult<()>,
    {
        let searcher = self.reader.searcher();
        let query: Box<dyn Query> = filter.to_query(&self.schema);
        let total = searcher.search(&query, &Count)?;

        let mut offset = 0;
        while offset < total {
            let page = searcher.search(
                &query,
                &TopDocs::with_limit(self.page_size).and_offset(offset),
            )?;
            if page.is_empty() {
                break;
            }
            for (_score, address) in &page {
                let doc: Document = searcher.doc(*address)?;
                visit(&doc)?;
            }
            offset += page.len();
        }
        Ok(())
    }

    fn text(&self, doc: &Document, field: tantivy::schema::Field) -> Option<String> {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Stored metadata, rebuilt from the filter fields when the JSON is unreadable.
    fn stored_metadata(&self, doc: &Document) -> ChunkMetadata {
        if let Some(json) = doc.get_first(self.schema.metadata).and_then(|v| v.as_str()) {
            match serde_json::from_str::<ChunkMetadata>(json) {
                Ok(metadata) => return metadata,
                Err(e) => {
                    tracing::warn!(target: "storage", "Unreadable chunk metadata in '{}': {e}", self.spec.name);
                }
            }
        }

        ChunkMetadata {
            source_id: self.text(doc, self.schema.source_id).unwrap_or_default(),
            filename: self.text(doc, self.schema.filename).unwrap_or_default(),
            unit_id: self.text(doc, self.schema.unit_id),
            ..ChunkMetadata::default()
        }
    }

    fn check_dimension(&self, actual: usize) -> StorageResult<()> {
        let expected = self.spec.dimension.get();
        if actual != expected {
            return Err(StorageError::DimensionMismatch {
                collection: self.spec.name.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn ensure_writer<'a>(
        &self,
        writer_guard: &'a mut Option<IndexWriter<Document>>,
    ) -> StorageResult<&'a mut IndexWriter<Document>> {
        let writer = match writer_guard.take() {
            Some(writer) => writer,
            None => self.index.writer_with_num_threads(1, self.heap_size)?,
        };
        Ok(writer_guard.insert(writer))
    }
}
