use tantivy::TantivyError;
use tantivy::directory::error::OpenDirectoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Directory error: {0}")]
    Directory(#[from] OpenDirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Batch length mismatch: {ids} ids, {contents} contents, {embeddings} embeddings, {metadatas} metadata records")]
    LengthMismatch {
        ids: usize,
        contents: usize,
        embeddings: usize,
        metadatas: usize,
    },

    #[error("Chunk id '{0}' already exists")]
    DuplicateId(String),

    #[error("Collection '{collection}' expects dimension {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Collection '{collection}' on disk does not match configuration: {reason}")]
    ManifestMismatch { collection: String, reason: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
}

impl StorageError {
    /// True when the caller passed bad input, as opposed to the index failing.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. }
                | Self::DuplicateId(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidFilter(_)
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
