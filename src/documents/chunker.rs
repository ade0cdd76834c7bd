//! Document chunking strategies.
//!
//! Provides the `Chunker` trait and three implementations:
//! - [`RowChunker`]: one chunk per data row of a markdown table
//! - [`UnitChunker`]: one chunk per unit already demarcated by the parser
//! - [`WindowChunker`]: fixed-size character windows for unstructured text
//!
//! All chunkers are pure. The same content and base metadata always produce
//! the same chunks in the same order.

use super::config::ChunkingConfig;
use super::types::{Chunk, ChunkId, ChunkMetadata, Granularity, MetadataValue};
use crate::parsing::ParsedUnit;

/// Separator between units in the text form accepted by [`UnitChunker`].
pub const UNIT_SEPARATOR: char = '\x0c';

/// Trait for document chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split document content into chunks.
    ///
    /// `base` carries the per-document metadata (source id, filename,
    /// category, upload time); chunkers add the structural fields.
    fn chunk(&self, content: &str, base: &ChunkMetadata) -> Vec<Chunk>;
}

/// Row chunker for markdown tables.
///
/// The header row and the alignment row (`|---|---|`) are skipped. Each data
/// row becomes one chunk whose content is the comma-joined cell values, so a
/// row reads the way its CSV line did.
#[derive(Debug, Default, Clone)]
pub struct RowChunker;

impl RowChunker {
    pub fn new() -> Self {
        Self
    }
}

impl Chunker for RowChunker {
    fn chunk(&self, content: &str, base: &ChunkMetadata) -> Vec<Chunk> {
        let mut table_lines = content
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('|') && line.len() > 1);

        let Some(header) = table_lines.next() else {
            return Vec::new();
        };
        let columns = split_cells(header).join(",");

        // Only the line right after the header can be the alignment row; a
        // later `| - | - |` is data.
        let mut table_lines = table_lines.peekable();
        table_lines.next_if(|line| is_alignment_row(line));

        let rows: Vec<Vec<String>> = table_lines
            .map(split_cells)
            .filter(|cells| cells.iter().any(|c| !c.is_empty()))
            .collect();

        let total_rows = rows.len() as u32;

        rows.into_iter()
            .enumerate()
            .map(|(i, cells)| {
                let row_index = i as u32 + 1;
                let mut metadata = base.clone().with_granularity(Granularity::Row);
                metadata.row_index = Some(row_index);
                metadata.total_rows = Some(total_rows);
                if !columns.is_empty() {
                    metadata
                        .extra
                        .insert("columns".to_string(), MetadataValue::Str(columns.clone()));
                }

                Chunk::new(
                    ChunkId::row(&base.source_id, row_index),
                    cells.join(","),
                    metadata,
                )
            })
            .collect()
    }
}

/// Split a markdown table line into trimmed cell values.
///
/// Honors `\|` escapes inside cells.
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = match inner.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => inner,
    };

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

fn is_alignment_row(line: &str) -> bool {
    let cells = split_cells(line);
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty()
                && cell.contains('-')
                && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
        })
}

/// Unit chunker: one chunk per parser-demarcated unit.
///
/// Unit numbering follows the parser's order and counts empty units, so page
/// numbers stay aligned with the source even when a page has no text.
#[derive(Debug, Clone)]
pub struct UnitChunker {
    granularity: Granularity,
}

impl UnitChunker {
    /// Chunker for paged documents (`page` granularity, sets `page`).
    pub fn pages() -> Self {
        Self {
            granularity: Granularity::Page,
        }
    }

    /// Chunker for coarse units (`case` granularity, sets `unit_id`).
    pub fn cases() -> Self {
        Self {
            granularity: Granularity::Case,
        }
    }

    /// Chunk units produced by a parser, carrying each unit's image.
    pub fn chunk_units(&self, units: &[ParsedUnit], base: &ChunkMetadata) -> Vec<Chunk> {
        units
            .iter()
            .enumerate()
            .filter_map(|(i, unit)| {
                let content = unit.text.trim();
                if content.is_empty() && unit.image.is_none() {
                    return None;
                }

                let unit_index = i as u32 + 1;
                let id = ChunkId::unit(&base.source_id, unit_index);

                let mut metadata = base.clone().with_granularity(self.granularity);
                metadata.unit_index = Some(unit_index);
                match self.granularity {
                    Granularity::Page => metadata.page = Some(unit_index),
                    _ => metadata.unit_id = Some(id.as_str().to_string()),
                }
                metadata.image_path = unit
                    .image
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned());

                Some(Chunk::new(id, content, metadata))
            })
            .collect()
    }
}

impl Chunker for UnitChunker {
    fn chunk(&self, content: &str, base: &ChunkMetadata) -> Vec<Chunk> {
        let units: Vec<ParsedUnit> = content.split(UNIT_SEPARATOR).map(ParsedUnit::text).collect();
        // Text-only input: units without text are dropped.
        self.chunk_units(&units, base)
            .into_iter()
            .filter(|c| !c.content.is_empty())
            .collect()
    }
}

/// Fixed-size fallback splitter.
///
/// Cuts character windows of `chunk_size`, preferring to end a window right
/// after a sentence terminator found within `boundary_lookback` characters of
/// the window end. Adjacent windows share `chunk_overlap` characters.
#[derive(Debug, Clone)]
pub struct WindowChunker {
    config: ChunkingConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Split text into trimmed, non-empty windows.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let size = self.config.chunk_size.max(1);
        let overlap = self.config.chunk_overlap.min(size - 1);

        let mut windows = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + size).min(len);

            if end < len {
                let floor = (start + 1).max(end.saturating_sub(self.config.boundary_lookback));
                if let Some(boundary) = (floor..=end).rev().find(|&b| is_sentence_end(&chars, b))
                {
                    end = boundary;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                windows.push(trimmed.to_string());
            }

            if end >= len {
                break;
            }

            let next = end.saturating_sub(overlap);
            start = if next > start { next } else { end };
        }

        windows
    }

    /// Split a coarse unit into fragments that reference it by `unit_id`.
    pub fn fragments(&self, unit: &Chunk) -> Vec<Chunk> {
        let unit_id = unit.id.as_str();

        self.split(&unit.content)
            .into_iter()
            .enumerate()
            .map(|(i, content)| {
                let ordinal = i as u32 + 1;
                let mut metadata = unit.metadata.clone().with_granularity(Granularity::Paragraph);
                metadata.unit_id = Some(unit_id.to_string());
                metadata.fragment_index = Some(ordinal);
                metadata.image_path = None;

                Chunk::new(ChunkId::fragment(unit_id, ordinal), content, metadata)
            })
            .collect()
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, content: &str, base: &ChunkMetadata) -> Vec<Chunk> {
        self.split(content)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let ordinal = i as u32 + 1;
                let mut metadata = base.clone().with_granularity(Granularity::Paragraph);
                metadata.unit_index = Some(ordinal);
                Chunk::new(ChunkId::paragraph(&base.source_id, ordinal), text, metadata)
            })
            .collect()
    }
}

/// True when a window may end at char offset `b` (exclusive).
fn is_sentence_end(chars: &[char], b: usize) -> bool {
    if b == 0 || b > chars.len() {
        return false;
    }
    match chars[b - 1] {
        '\n' => true,
        '.' | '!' | '?' => chars.get(b).is_none_or(|c| c.is_whitespace()),
        _ => false,
    }
}
