//! Facade error type shared by the lifecycle manager, the retrievers and
//! the CLI.

use thiserror::Error;

use crate::generation::GenerationError;
use crate::parsing::ParseError;
use crate::storage::StorageError;
use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Document '{filename}' is already indexed as {source_id}")]
    DuplicateDocument { filename: String, source_id: String },

    #[error("Failed to parse document: {0}")]
    ParseFailure(String),

    #[error("Failed to embed: {0}")]
    EmbeddingFailure(String),

    #[error("Index failure: {0}")]
    IndexFailure(String),

    /// Some collections changed, others did not. The index needs repair.
    #[error("Partial consistency: succeeded in [{}], failed in [{}]", .succeeded.join(", "), .failed.join(", "))]
    PartialConsistency {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    #[error("Answer generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::DuplicateDocument { .. } => "duplicate_document",
            Self::ParseFailure(_) => "parse_failure",
            Self::EmbeddingFailure(_) => "embedding_failure",
            Self::IndexFailure(_) => "index_failure",
            Self::PartialConsistency { .. } => "partial_consistency",
            Self::Generation(_) => "generation",
            Self::Config(_) => "config",
        }
    }

    /// Recovery hint for users.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("Run 'dataroom list' to see indexed documents"),
            Self::DuplicateDocument { .. } => {
                Some("Use 'dataroom update' to replace the existing document")
            }
            Self::PartialConsistency { .. } => {
                Some("Delete the document again, or run 'dataroom reset --yes' and re-upload")
            }
            Self::Config(_) => Some("Check .dataroom/settings.toml or run 'dataroom init --force'"),
            Self::EmbeddingFailure(_) => {
                Some("Check embedding.model and that the model cache is writable")
            }
            _ => None,
        }
    }
}

impl From<VectorError> for RagError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::InvalidInput(msg) => Self::InvalidInput(msg),
            VectorError::UnknownModel(name) => Self::Config(format!("unknown embedding model '{name}'")),
            other => Self::EmbeddingFailure(other.to_string()),
        }
    }
}

impl From<StorageError> for RagError {
    fn from(err: StorageError) -> Self {
        if err.is_caller_error() {
            Self::InvalidInput(err.to_string())
        } else {
            Self::IndexFailure(err.to_string())
        }
    }
}

impl From<ParseError> for RagError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unsupported(ext) => {
                Self::InvalidInput(format!("unsupported file type {ext}"))
            }
            other => Self::ParseFailure(other.to_string()),
        }
    }
}

impl From<GenerationError> for RagError {
    fn from(err: GenerationError) -> Self {
        Self::Generation(err.to_string())
    }
}

pub type RagResult<T> = Result<T, RagError>;
