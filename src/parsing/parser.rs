//! Document parser trait
//!
//! This module defines the interface any document parser must implement to
//! feed the ingestion pipeline: turn a file into normalized text plus
//! structural units.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::documents::types::MetadataValue;

/// One structural unit (page, section, case record) demarcated by a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    pub text: String,
    /// Image belonging to this unit, if the source carries one.
    pub image: Option<PathBuf>,
}

impl ParsedUnit {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }
}

/// Parser output: either already-demarcated units or free markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedContent {
    Units(Vec<ParsedUnit>),
    Markdown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub content: ParsedContent,
    /// Document-level metadata reported by the parser.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl ParsedDocument {
    pub fn units(units: Vec<ParsedUnit>) -> Self {
        Self {
            content: ParsedContent::Units(units),
            metadata: BTreeMap::new(),
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            content: ParsedContent::Markdown(text.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// Result of one parse call.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Ready(ParsedDocument),
    /// The parser accepted the file but has no result yet; poll again.
    Pending { progress: Option<String> },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("Malformed {format} input: {reason}")]
    Malformed { format: &'static str, reason: String },

    #[error("Parser command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Parser timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Parser service error: {0}")]
    Service(String),
}

/// Common interface for document parsers.
pub trait DocumentParser: Send + Sync {
    /// Parse a file. Errors abort ingestion of that file.
    fn parse(&self, path: &Path) -> Result<ParseOutcome, ParseError>;
}
