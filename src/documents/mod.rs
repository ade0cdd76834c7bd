//! Documents: what gets indexed and how its lifecycle is managed.
//!
//! - [`types`]: chunks, chunk ids and the structural metadata they carry
//! - [`chunker`]: row, unit and window chunking strategies
//! - [`config`]: chunking and collection naming settings
//! - [`manager`]: upload, update, delete and listing across collections

pub mod chunker;
pub mod config;
pub mod manager;
pub mod types;

pub use chunker::{Chunker, RowChunker, UnitChunker, WindowChunker};
pub use config::{ChunkingConfig, CollectionsConfig};
pub use manager::{
    CollectionWrite, DeleteReport, DocumentManager, DocumentSummary, UpdateReport, UploadMetadata,
    UploadReport,
};
pub use types::{Category, Chunk, ChunkId, ChunkMetadata, Granularity, MetadataValue, derive_source_id};
