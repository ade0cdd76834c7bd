//! Core types for document chunks and their metadata.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Unique identifier for a chunk, deterministic from its source and ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `{source_id}_row_{row_index}`
    pub fn row(source_id: &str, row_index: u32) -> Self {
        Self(format!("{source_id}_row_{row_index}"))
    }

    /// `{source_id}_unit_{unit_index}`
    pub fn unit(source_id: &str, unit_index: u32) -> Self {
        Self(format!("{source_id}_unit_{unit_index}"))
    }

    /// `{source_id}_para_{ordinal}`
    pub fn paragraph(source_id: &str, ordinal: u32) -> Self {
        Self(format!("{source_id}_para_{ordinal}"))
    }

    /// `{unit_id}_frag_{ordinal}`
    pub fn fragment(unit_id: &str, ordinal: u32) -> Self {
        Self(format!("{unit_id}_frag_{ordinal}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structural level a chunk was cut at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Page,
    Row,
    #[default]
    Paragraph,
    Case,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Row => "row",
            Self::Paragraph => "paragraph",
            Self::Case => "case",
        }
    }
}

/// Document category, selected from the file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Row-oriented documents (CSV, TSV).
    Tabular,
    /// Page-oriented documents (PDF text, markdown, plain text).
    #[default]
    Paged,
}

/// Extension dispatch table. Lookups are case-insensitive.
const CATEGORY_BY_EXTENSION: &[(&str, Category)] = &[
    ("csv", Category::Tabular),
    ("tsv", Category::Tabular),
    ("pdf", Category::Paged),
    ("md", Category::Paged),
    ("markdown", Category::Paged),
    ("txt", Category::Paged),
];

impl Category {
    /// Resolve the category of a file, or `None` for unsupported extensions.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        CATEGORY_BY_EXTENSION
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, category)| *category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tabular => "tabular",
            Self::Paged => "paged",
        }
    }

    /// Extensions accepted for this category.
    pub fn extensions(&self) -> Vec<&'static str> {
        CATEGORY_BY_EXTENSION
            .iter()
            .filter(|(_, category)| category == self)
            .map(|(ext, _)| *ext)
            .collect()
    }
}

/// Scalar metadata value stored in the open extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Structural metadata attached to every chunk.
///
/// Well-known fields are typed; anything else goes into `extra`. Every field
/// has a serde default so records written by older versions still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub source_id: String,

    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub granularity: Granularity,

    /// RFC 3339 upload timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time: Option<String>,

    /// 1-based page number for paged units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// 1-based data row index for tabular rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u32>,

    /// 1-based ordinal of the structural unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_index: Option<u32>,

    /// Coarse unit this chunk belongs to (fine collection join key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,

    /// 1-based ordinal of a fragment inside its unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetadataValue>,
}

impl ChunkMetadata {
    /// Base metadata for every chunk of one source document.
    pub fn for_source(
        source_id: impl Into<String>,
        filename: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            filename: filename.into(),
            category,
            ..Default::default()
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_upload_time(mut self, upload_time: impl Into<String>) -> Self {
        self.upload_time = Some(upload_time.into());
        self
    }
}

/// A retrievable unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(id: ChunkId, content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id,
            content: content.into(),
            metadata,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.metadata.source_id
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Derive a stable source id from a filename: `{category}_{stem}_{hash8}`.
///
/// The stem is lowercased with anything outside `[a-z0-9]` mapped to `-`.
pub fn derive_source_id(filename: &str, category: Category) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);

    let sanitized: String = stem
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    let digest = Sha256::digest(filename.as_bytes());
    let hash8: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    format!("{}_{sanitized}_{hash8}", category.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_patterns() {
        assert_eq!(ChunkId::row("csv_a", 3).as_str(), "csv_a_row_3");
        assert_eq!(ChunkId::unit("pdf_a", 1).as_str(), "pdf_a_unit_1");
        assert_eq!(ChunkId::paragraph("pdf_a", 2).as_str(), "pdf_a_para_2");
        assert_eq!(
            ChunkId::fragment("pdf_a_unit_1", 4).as_str(),
            "pdf_a_unit_1_frag_4"
        );
    }

    #[test]
    fn test_category_dispatch() {
        assert_eq!(
            Category::from_path(Path::new("data/people.CSV")),
            Some(Category::Tabular)
        );
        assert_eq!(
            Category::from_path(Path::new("report.pdf")),
            Some(Category::Paged)
        );
        assert_eq!(Category::from_path(Path::new("notes.md")), Some(Category::Paged));
        assert_eq!(Category::from_path(Path::new("image.png")), None);
        assert_eq!(Category::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_source_id_is_stable() {
        let a = derive_source_id("Q3 Report.pdf", Category::Paged);
        let b = derive_source_id("Q3 Report.pdf", Category::Paged);
        let c = derive_source_id("Q4 Report.pdf", Category::Paged);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("paged_q3-report_"));
        assert_eq!(a.len(), "paged_q3-report_".len() + 8);
    }

    #[test]
    fn test_metadata_tolerates_missing_fields() {
        let meta: ChunkMetadata = serde_json::from_str(r#"{"filename": "old.csv"}"#).unwrap();
        assert_eq!(meta.filename, "old.csv");
        assert!(meta.source_id.is_empty());
        assert!(meta.row_index.is_none());
        assert_eq!(meta.granularity, Granularity::Paragraph);
    }

    #[test]
    fn test_metadata_extra_round_trip() {
        let mut meta = ChunkMetadata::for_source("s1", "a.csv", Category::Tabular);
        meta.extra.insert("owner".into(), "finance".into());
        meta.extra.insert("year".into(), MetadataValue::Int(2024));

        let json = serde_json::to_string(&meta).unwrap();
        let back: ChunkMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
