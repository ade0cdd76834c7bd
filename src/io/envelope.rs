//! JSON output envelope for CLI commands.
//!
//! Every command prints one of these when `--json` is used, so scripts can
//! branch on `status`/`code` without parsing human output.

use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Schema version for this envelope format.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Message type for stream discrimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Successful result (may contain data or be empty)
    Result,
    /// Error occurred
    Error,
}

/// Operation outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Operation succeeded with results
    Success,
    /// Operation succeeded but found nothing
    NotFound,
    /// Some collections changed, others did not
    PartialSuccess,
    /// Operation failed
    Error,
}

/// Machine-readable result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    NotFound,
    InvalidInput,
    DuplicateDocument,
    ParseError,
    EmbeddingError,
    IndexError,
    PartialConsistency,
    GenerationError,
    ConfigError,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::DuplicateDocument => "DUPLICATE_DOCUMENT",
            Self::ParseError => "PARSE_ERROR",
            Self::EmbeddingError => "EMBEDDING_ERROR",
            Self::IndexError => "INDEX_ERROR",
            Self::PartialConsistency => "PARTIAL_CONSISTENCY",
            Self::GenerationError => "GENERATION_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::NotFound => 1,
            Self::InvalidInput | Self::DuplicateDocument | Self::ConfigError => 2,
            Self::PartialConsistency => 4,
            _ => 3,
        }
    }
}

impl From<&RagError> for ResultCode {
    fn from(err: &RagError) -> Self {
        match err {
            RagError::InvalidInput(_) => Self::InvalidInput,
            RagError::NotFound(_) => Self::NotFound,
            RagError::DuplicateDocument { .. } => Self::DuplicateDocument,
            RagError::ParseFailure(_) => Self::ParseError,
            RagError::EmbeddingFailure(_) => Self::EmbeddingError,
            RagError::IndexFailure(_) => Self::IndexError,
            RagError::PartialConsistency { .. } => Self::PartialConsistency,
            RagError::Generation(_) => Self::GenerationError,
            RagError::Config(_) => Self::ConfigError,
        }
    }
}

/// Entity type in the data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Document,
    Upload,
    Deletion,
    Collection,
    Answer,
    Config,
}

/// Output envelope. All CLI commands print this structure with `--json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    #[serde(rename = "type")]
    pub message_type: MessageType,

    pub status: Status,

    pub code: ResultCode,

    /// Unix exit code (0-255)
    pub exit_code: u8,

    /// Human-readable message
    pub message: String,

    /// Next step for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Result payload (null on error)
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,

    pub meta: Meta,
}

/// Error details with suggestions and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error kind, e.g. `duplicate_document`
    pub kind: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    /// Number of items in data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    /// Original query string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            entity_type: None,
            count: None,
            query: None,
            duration_ms: None,
        }
    }
}

impl<T> Envelope<T> {
    /// Create a success envelope with data.
    pub fn success(data: T) -> Self {
        Self {
            message_type: MessageType::Result,
            status: Status::Success,
            code: ResultCode::Ok,
            exit_code: 0,
            message: "Operation completed successfully".to_string(),
            hint: None,
            data: Some(data),
            error: None,
            meta: Meta::default(),
        }
    }

    /// Create a not-found envelope. Data may still describe what was searched.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Result,
            status: Status::NotFound,
            code: ResultCode::NotFound,
            exit_code: ResultCode::NotFound.exit_code(),
            message: message.into(),
            hint: None,
            data: None,
            error: None,
            meta: Meta::default(),
        }
    }

    /// Create an error envelope.
    pub fn error(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            status: Status::Error,
            code,
            exit_code: code.exit_code(),
            message: message.into(),
            hint: None,
            data: None,
            error: None,
            meta: Meta::default(),
        }
    }

    /// Envelope describing a failed operation.
    pub fn from_error(err: &RagError) -> Self {
        let code = ResultCode::from(err);
        let mut envelope = match err {
            RagError::NotFound(_) => Self::not_found(err.to_string()),
            _ => Self::error(code, err.to_string()),
        };
        if code == ResultCode::PartialConsistency {
            envelope.status = Status::PartialSuccess;
        }

        let context = match err {
            RagError::PartialConsistency { succeeded, failed } => Some(serde_json::json!({
                "succeeded": succeeded,
                "failed": failed,
            })),
            RagError::DuplicateDocument {
                filename,
                source_id,
            } => Some(serde_json::json!({
                "filename": filename,
                "source_id": source_id,
            })),
            _ => None,
        };

        envelope.error = Some(ErrorDetails {
            kind: err.kind().to_string(),
            suggestions: err.suggestion().map(str::to_string).into_iter().collect(),
            context,
        });
        envelope
    }

    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.meta.entity_type = Some(entity_type);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.meta.count = Some(count);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.meta.query = Some(query.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.meta.duration_ms = Some(duration_ms);
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error>
    where
        T: Serialize,
    {
        serde_json::to_string_pretty(self)
    }

    /// Serialize to compact JSON string (no whitespace).
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error>
    where
        T: Serialize,
    {
        serde_json::to_string(self)
    }
}
