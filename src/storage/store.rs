//! The set of collections under one index path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::collection::{Collection, CollectionSpec};
use super::error::{StorageError, StorageResult};
use super::filter::MetadataFilter;
use crate::config::StorageConfig;
use crate::documents::config::CollectionsConfig;
use crate::documents::types::Granularity;
use crate::vector::{VectorDimension, VectorLayout};

/// Which of the four configured collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionRole {
    /// Page-oriented documents, single-stage retrieval.
    Paged,
    /// Row-oriented documents, single-stage retrieval.
    Tabular,
    /// Coarse units, first cascade stage.
    Units,
    /// Fine fragments, second cascade stage.
    Fragments,
}

impl CollectionRole {
    pub const ALL: [CollectionRole; 4] = [Self::Paged, Self::Tabular, Self::Units, Self::Fragments];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paged => "paged",
            Self::Tabular => "tabular",
            Self::Units => "units",
            Self::Fragments => "fragments",
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Self::Paged => Granularity::Page,
            Self::Tabular => Granularity::Row,
            Self::Units => Granularity::Case,
            Self::Fragments => Granularity::Paragraph,
        }
    }

    /// Units carry an image slice; everything else is text only.
    pub fn layout(&self) -> VectorLayout {
        match self {
            Self::Units => VectorLayout::TextImage,
            _ => VectorLayout::Text,
        }
    }

    pub fn collection_name<'a>(&self, config: &'a CollectionsConfig) -> &'a str {
        match self {
            Self::Paged => &config.paged,
            Self::Tabular => &config.tabular,
            Self::Units => &config.units,
            Self::Fragments => &config.fragments,
        }
    }
}

impl std::fmt::Display for CollectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-collection counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub role: CollectionRole,
    pub chunks: usize,
    pub sources: usize,
    pub dimension: usize,
}

/// Collections keyed by role. Each is opened on first construction and
/// shared behind an `Arc`.
#[derive(Debug)]
pub struct IndexStore {
    root: PathBuf,
    collections: Vec<(CollectionRole, Arc<Collection>)>,
}

impl IndexStore {
    /// Open the given roles under `root`.
    ///
    /// `dimension_for` maps a role's layout to the embedder's output width.
    pub fn open<F>(
        root: impl AsRef<Path>,
        roles: &[CollectionRole],
        names: &CollectionsConfig,
        storage: &StorageConfig,
        mut dimension_for: F,
    ) -> StorageResult<Self>
    where
        F: FnMut(VectorLayout) -> Option<VectorDimension>,
    {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let mut collections = Vec::with_capacity(roles.len());
        for role in roles {
            let name = role.collection_name(names).to_string();
            let Some(dimension) = dimension_for(role.layout()) else {
                tracing::debug!(target: "storage", "Skipping '{name}': no embedder for {:?}", role.layout());
                continue;
            };
            let spec = CollectionSpec {
                name: name.clone(),
                granularity: role.granularity(),
                layout: role.layout(),
                dimension,
            };
            let collection = Collection::open(root.join(&name), spec, storage)?;
            collections.push((*role, Arc::new(collection)));
        }

        tracing::info!(
            target: "storage",
            "Index store at {} with {} collections",
            root.display(),
            collections.len()
        );

        Ok(Self { root, collections })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, role: CollectionRole) -> Option<&Arc<Collection>> {
        self.collections
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, c)| c)
    }

    pub fn collection(&self, role: CollectionRole) -> StorageResult<&Arc<Collection>> {
        self.get(role)
            .ok_or_else(|| StorageError::CollectionNotFound(role.to_string()))
    }

    /// Every open collection with its role.
    pub fn iter(&self) -> impl Iterator<Item = (CollectionRole, &Arc<Collection>)> {
        self.collections.iter().map(|(r, c)| (*r, c))
    }

    pub fn stats(&self) -> StorageResult<Vec<CollectionStats>> {
        self.iter()
            .map(|(role, collection)| {
                let sources: BTreeSet<String> = collection
                    .list_by_filter(&MetadataFilter::all())?
                    .into_iter()
                    .map(|m| m.source_id)
                    .collect();
                Ok(CollectionStats {
                    name: collection.name().to_string(),
                    role,
                    chunks: collection.count()?,
                    sources: sources.len(),
                    dimension: collection.dimension(),
                })
            })
            .collect()
    }

    /// Empty every collection. Returns the number of chunks removed.
    pub fn reset(&self) -> StorageResult<usize> {
        let mut removed = 0;
        for (_, collection) in self.iter() {
            removed += collection.reset()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::types::{Category, Chunk, ChunkId, ChunkMetadata};
    use tempfile::TempDir;

    fn dims(layout: VectorLayout) -> Option<VectorDimension> {
        match layout {
            VectorLayout::Text => VectorDimension::new(4).ok(),
            VectorLayout::TextImage => VectorDimension::new(8).ok(),
        }
    }

    #[test]
    fn test_open_all_roles() {
        let dir = TempDir::new().unwrap();
        let names = CollectionsConfig::default();
        let store = IndexStore::open(
            dir.path(),
            &CollectionRole::ALL,
            &names,
            &StorageConfig::default(),
            dims,
        )
        .unwrap();

        assert_eq!(store.iter().count(), 4);
        assert_eq!(store.collection(CollectionRole::Units).unwrap().dimension(), 8);
        assert_eq!(store.collection(CollectionRole::Paged).unwrap().dimension(), 4);
        assert!(dir.path().join(&names.tabular).join("collection.json").exists());
    }

    #[test]
    fn test_missing_image_model_skips_units() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(
            dir.path(),
            &CollectionRole::ALL,
            &CollectionsConfig::default(),
            &StorageConfig::default(),
            |layout| match layout {
                VectorLayout::Text => VectorDimension::new(4).ok(),
                VectorLayout::TextImage => None,
            },
        )
        .unwrap();

        assert!(store.get(CollectionRole::Units).is_none());
        assert!(store.collection(CollectionRole::Units).is_err());
        assert!(store.get(CollectionRole::Fragments).is_some());
    }

    #[test]
    fn test_stats_and_reset() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(
            dir.path(),
            &[CollectionRole::Tabular],
            &CollectionsConfig::default(),
            &StorageConfig::default(),
            dims,
        )
        .unwrap();

        let tabular = store.collection(CollectionRole::Tabular).unwrap();
        let chunks: Vec<Chunk> = ["a", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let metadata = ChunkMetadata::for_source(*source, "f.csv", Category::Tabular);
                Chunk::new(ChunkId::row(source, i as u32 + 1), "x", metadata)
            })
            .collect();
        let embeddings = vec![vec![1.0, 0.0, 0.0, 0.0]; 3];
        tabular.insert_chunks(&chunks, &embeddings).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].chunks, 3);
        assert_eq!(stats[0].sources, 2);
        assert_eq!(stats[0].role, CollectionRole::Tabular);

        assert_eq!(store.reset().unwrap(), 3);
        assert_eq!(store.stats().unwrap()[0].chunks, 0);
    }
}
