//! Local parser for tabular and text documents.
//!
//! CSV and TSV become markdown tables. Text and markdown become units split
//! on form feeds (the page separator `pdftotext` emits) or on top-level
//! headings; text with neither is returned as free markdown. Other
//! extensions can be routed through an external command whose stdout is
//! treated as text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;

use super::parser::{
    DocumentParser, ParseError, ParseOutcome, ParsedContent, ParsedDocument, ParsedUnit,
};
use crate::documents::chunker::UNIT_SEPARATOR;
use crate::documents::types::MetadataValue;

/// Placeholder substituted with the input path in external commands.
pub const INPUT_PLACEHOLDER: &str = "{input}";

static IMAGE_REF: OnceLock<Option<Regex>> = OnceLock::new();

fn image_ref() -> Option<&'static Regex> {
    IMAGE_REF
        .get_or_init(|| Regex::new(r"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?").ok())
        .as_ref()
}

/// Parser that works on the local filesystem without a service.
#[derive(Debug, Clone, Default)]
pub struct LocalParser {
    /// Extension (lowercase, no dot) to argv template.
    commands: BTreeMap<String, Vec<String>>,
}

impl LocalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser with external commands keyed by extension.
    pub fn with_commands(commands: BTreeMap<String, Vec<String>>) -> Self {
        let commands = commands
            .into_iter()
            .map(|(ext, argv)| (ext.trim_start_matches('.').to_ascii_lowercase(), argv))
            .collect();
        Self { commands }
    }

    fn read(path: &Path) -> Result<String, ParseError> {
        std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn run_command(&self, argv: &[String], path: &Path) -> Result<String, ParseError> {
        let input = path.to_string_lossy();
        let args: Vec<String> = argv
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, &input))
            .collect();

        let Some((program, rest)) = args.split_first() else {
            return Err(ParseError::Command {
                command: String::new(),
                reason: "empty command".to_string(),
            });
        };

        tracing::debug!(target: "parsing", "running {program} for {}", path.display());

        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| ParseError::Command {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ParseError::Command {
                command: program.clone(),
                reason: format!(
                    "exit status {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| ParseError::Command {
            command: program.clone(),
            reason: format!("output is not UTF-8: {e}"),
        })
    }
}

impl DocumentParser for LocalParser {
    fn parse(&self, path: &Path) -> Result<ParseOutcome, ParseError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mut document = match ext.as_str() {
            "csv" => parse_delimited(&Self::read(path)?, ',')?,
            "tsv" => parse_delimited(&Self::read(path)?, '\t')?,
            "md" | "markdown" | "txt" => parse_text(&Self::read(path)?, path.parent()),
            other => match self.commands.get(other) {
                Some(argv) => parse_text(&self.run_command(argv, path)?, path.parent()),
                None => return Err(ParseError::Unsupported(format!(".{other}"))),
            },
        };

        document
            .metadata
            .insert("parser".to_string(), MetadataValue::from("local"));

        Ok(ParseOutcome::Ready(document))
    }
}

/// Render delimited text as a markdown table with an alignment row.
fn parse_delimited(content: &str, delimiter: char) -> Result<ParsedDocument, ParseError> {
    let records = read_records(content, delimiter)?;
    let mut records = records
        .into_iter()
        .filter(|r| r.iter().any(|field| !field.trim().is_empty()));

    let Some(header) = records.next() else {
        return Err(ParseError::Malformed {
            format: "delimited",
            reason: "no header row".to_string(),
        });
    };

    let mut lines = vec![markdown_row(&header), markdown_alignment(header.len())];
    let mut rows = 0i64;
    for record in records {
        lines.push(markdown_row(&record));
        rows += 1;
    }

    let mut document = ParsedDocument::markdown(lines.join("\n"));
    document
        .metadata
        .insert("rows".to_string(), MetadataValue::Int(rows));
    document
        .metadata
        .insert("columns".to_string(), MetadataValue::Int(header.len() as i64));
    Ok(document)
}

fn markdown_row(fields: &[String]) -> String {
    let cells: Vec<String> = fields
        .iter()
        .map(|f| f.trim().replace('|', "\\|").replace(['\r', '\n'], " "))
        .collect();
    format!("| {} |", cells.join(" | "))
}

fn markdown_alignment(columns: usize) -> String {
    format!("|{}", "---|".repeat(columns.max(1)))
}

/// Minimal RFC 4180 reader: quoted fields, doubled quotes, embedded newlines.
fn read_records(content: &str, delimiter: char) -> Result<Vec<Vec<String>>, ParseError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ParseError::Malformed {
            format: "delimited",
            reason: "unterminated quoted field".to_string(),
        });
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}

/// Split text into units on form feeds, else on top-level headings.
fn parse_text(content: &str, base_dir: Option<&Path>) -> ParsedDocument {
    let units: Vec<String> = if content.contains(UNIT_SEPARATOR) {
        content.split(UNIT_SEPARATOR).map(str::to_string).collect()
    } else {
        split_top_level_sections(content)
    };

    if units.len() <= 1 && !content.contains(UNIT_SEPARATOR) {
        return ParsedDocument {
            content: ParsedContent::Markdown(content.to_string()),
            metadata: BTreeMap::new(),
        };
    }

    let units = units
        .into_iter()
        .map(|text| {
            let image = first_image(&text, base_dir);
            ParsedUnit { text, image }
        })
        .collect();

    ParsedDocument::units(units)
}

/// Sections start at `# ` lines. Text before the first heading is its own unit.
fn split_top_level_sections(content: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.starts_with("# ") && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        sections.push(current);
    }

    sections
}

/// First markdown image reference in `text` that points at an existing file.
fn first_image(text: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
    let re = image_ref()?;
    re.captures_iter(text).find_map(|caps| {
        let raw = caps.get(1)?.as_str();
        if raw.contains("://") {
            return None;
        }
        let candidate = PathBuf::from(raw);
        let resolved = match base_dir {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate,
        };
        resolved.is_file().then_some(resolved)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ready(outcome: ParseOutcome) -> ParsedDocument {
        match outcome {
            ParseOutcome::Ready(doc) => doc,
            ParseOutcome::Pending { .. } => panic!("local parser never pends"),
        }
    }

    #[test]
    fn test_csv_becomes_markdown_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name,age\nAlice,30\nBob,40\nCarol,50\n").unwrap();

        let doc = ready(LocalParser::new().parse(&path).unwrap());
        let ParsedContent::Markdown(table) = doc.content else {
            panic!("expected markdown");
        };

        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| name | age |");
        assert_eq!(lines[1], "|---|---|");
        assert_eq!(lines[2], "| Alice | 30 |");
        assert_eq!(lines.len(), 5);
        assert_eq!(doc.metadata.get("rows"), Some(&MetadataValue::Int(3)));
    }

    #[test]
    fn test_quoted_fields() {
        let records = read_records("a,b\n\"x, y\",\"say \"\"hi\"\"\"\n", ',').unwrap();
        assert_eq!(records[1], vec!["x, y".to_string(), "say \"hi\"".to_string()]);

        assert!(read_records("a,\"open\n", ',').is_err());
    }

    #[test]
    fn test_tsv_and_pipes() {
        let doc = parse_delimited("k\tv\na|b\t1\n", '\t').unwrap();
        let ParsedContent::Markdown(table) = doc.content else {
            panic!("expected markdown");
        };
        assert!(table.contains("| a\\|b | 1 |"));
    }

    #[test]
    fn test_form_feed_pages() {
        let doc = parse_text("page one\x0cpage two\x0c", None);
        let ParsedContent::Units(units) = doc.content else {
            panic!("expected units");
        };
        assert_eq!(units.len(), 3);
        assert_eq!(units[1].text, "page two");
    }

    #[test]
    fn test_heading_sections() {
        let doc = parse_text("intro\n# Case A\nalpha\n# Case B\nbeta\n", None);
        let ParsedContent::Units(units) = doc.content else {
            panic!("expected units");
        };
        assert_eq!(units.len(), 3);
        assert!(units[1].text.starts_with("# Case A"));
        assert!(units[2].text.contains("beta"));
    }

    #[test]
    fn test_unstructured_text_stays_markdown() {
        let doc = parse_text("just some prose without structure", None);
        assert!(matches!(doc.content, ParsedContent::Markdown(_)));
    }

    #[test]
    fn test_unit_image_resolves_relative_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("scan.png"), b"png").unwrap();

        let doc = parse_text(
            "# Case A\n![x-ray](scan.png)\n# Case B\n![missing](nope.png)\n",
            Some(dir.path()),
        );
        let ParsedContent::Units(units) = doc.content else {
            panic!("expected units");
        };
        assert_eq!(units[0].image, Some(dir.path().join("scan.png")));
        assert_eq!(units[1].image, None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = LocalParser::new().parse(Path::new("slides.pptx")).unwrap_err();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LocalParser::new()
            .parse(Path::new("/definitely/not/here.csv"))
            .unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
