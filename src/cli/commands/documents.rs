//! Document lifecycle commands: upload, update, delete, list, stats, reset.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use walkdir::WalkDir;

use super::{print_json, report_error};
use crate::Dataroom;
use crate::documents::{Category, MetadataValue, UploadMetadata, UploadReport};
use crate::error::RagError;
use crate::io::{EntityType, Envelope, ResultCode, Status, table};

#[derive(Debug, Serialize)]
struct FailedUpload {
    path: PathBuf,
    kind: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct UploadBatch {
    uploaded: Vec<UploadReport>,
    failed: Vec<FailedUpload>,
}

/// Expand files, directories and glob patterns into supported files.
///
/// Directories are walked recursively and only files with a known extension
/// are kept from them. Explicit files are passed through so unsupported
/// types are reported rather than silently skipped.
pub fn expand_paths(inputs: &[String]) -> Result<Vec<PathBuf>, RagError> {
    let mut files = Vec::new();

    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(|e| RagError::InvalidInput(format!("{input}: {e}")))?;
                if entry.file_type().is_file() && Category::from_path(entry.path()).is_some() {
                    files.push(entry.into_path());
                }
            }
        } else if path.exists() {
            files.push(path.to_path_buf());
        } else {
            let matches = glob::glob(input)
                .map_err(|e| RagError::InvalidInput(format!("bad pattern '{input}': {e}")))?;
            let before = files.len();
            for entry in matches.flatten() {
                if entry.is_file() {
                    files.push(entry);
                }
            }
            if files.len() == before {
                return Err(RagError::InvalidInput(format!("no files match '{input}'")));
            }
        }
    }

    files.dedup();
    Ok(files)
}

/// Parse `key=value` pairs. Integers, floats and booleans keep their type.
pub fn parse_meta(pairs: &[String]) -> Result<BTreeMap<String, MetadataValue>, RagError> {
    let mut extra = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            RagError::InvalidInput(format!("metadata '{pair}' is not key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RagError::InvalidInput(format!("metadata '{pair}' has an empty key")));
        }

        let value = value.trim();
        let parsed = if let Ok(i) = value.parse::<i64>() {
            MetadataValue::Int(i)
        } else if let Ok(f) = value.parse::<f64>() {
            MetadataValue::Float(f)
        } else if let Ok(b) = value.parse::<bool>() {
            MetadataValue::Bool(b)
        } else {
            MetadataValue::Str(value.to_string())
        };
        extra.insert(key.to_string(), parsed);
    }
    Ok(extra)
}

fn upload_metadata(source_id: Option<String>, meta: &[String]) -> Result<UploadMetadata, RagError> {
    Ok(UploadMetadata {
        source_id,
        extra: parse_meta(meta)?,
    })
}

pub fn run_upload(
    room: &Dataroom,
    paths: &[String],
    source_id: Option<String>,
    meta: &[String],
    no_progress: bool,
    json: bool,
) -> u8 {
    let files = match expand_paths(paths) {
        Ok(files) => files,
        Err(e) => return report_error(&e, json),
    };
    if source_id.is_some() && files.len() > 1 {
        let err = RagError::InvalidInput("--source-id needs exactly one file".to_string());
        return report_error(&err, json);
    }
    let metadata = match upload_metadata(source_id, meta) {
        Ok(m) => m,
        Err(e) => return report_error(&e, json),
    };

    let progress = if no_progress || json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(files.len() as u64)
    };
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(style.progress_chars("#>-"));
    }

    let mut batch = UploadBatch {
        uploaded: Vec::new(),
        failed: Vec::new(),
    };
    let mut first_error: Option<RagError> = None;

    for file in &files {
        progress.set_message(file.display().to_string());
        match room.upload(file, metadata.clone()) {
            Ok(report) => batch.uploaded.push(report),
            Err(e) => {
                progress.suspend(|| {
                    if !json {
                        eprintln!("Failed: {}: {e}", file.display());
                    }
                });
                batch.failed.push(FailedUpload {
                    path: file.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    let exit_code = match &first_error {
        None => 0,
        Some(e) => ResultCode::from(e).exit_code(),
    };

    if json {
        let count = batch.uploaded.len();
        let message = format!("{count} of {} files indexed", files.len());
        let mut envelope = match &first_error {
            None => Envelope::success(batch),
            Some(e) => Envelope::error(ResultCode::from(e), message.clone()).with_data(batch),
        };
        if first_error.is_some() && count > 0 {
            envelope.status = Status::PartialSuccess;
        }
        return print_json(
            &envelope
                .with_entity_type(EntityType::Upload)
                .with_count(count)
                .with_message(message),
        );
    }

    for report in &batch.uploaded {
        println!(
            "Indexed {} as {} ({} chunks)",
            report.filename,
            report.source_id,
            report.total_chunks()
        );
    }
    if let Some(e) = &first_error {
        if let Some(suggestion) = e.suggestion() {
            eprintln!("  {suggestion}");
        }
    }
    exit_code
}

pub fn run_update(
    room: &Dataroom,
    path: &Path,
    source_id: Option<String>,
    meta: &[String],
    json: bool,
) -> u8 {
    let result = upload_metadata(source_id, meta).and_then(|m| room.update(path, m));
    match result {
        Ok(report) => {
            if json {
                return print_json(&Envelope::success(&report).with_entity_type(EntityType::Upload));
            }
            match &report.replaced {
                Some(old) => println!(
                    "Replaced {} ({} chunks removed, {} indexed)",
                    report.upload.source_id,
                    old.total_chunks(),
                    report.upload.total_chunks()
                ),
                None => println!(
                    "Indexed {} as {} ({} chunks)",
                    report.upload.filename,
                    report.upload.source_id,
                    report.upload.total_chunks()
                ),
            }
            0
        }
        Err(e) => report_error(&e, json),
    }
}

pub fn run_delete(room: &Dataroom, source_id: Option<&str>, file: Option<&str>, json: bool) -> u8 {
    let result = match (source_id, file) {
        (Some(id), _) => room.delete(id).map(|r| vec![r]),
        (None, Some(filename)) => room.delete_by_filename(filename),
        (None, None) => Err(RagError::InvalidInput(
            "give a source id or --file".to_string(),
        )),
    };

    match result {
        Ok(reports) => {
            if json {
                let count = reports.len();
                return print_json(
                    &Envelope::success(reports)
                        .with_entity_type(EntityType::Deletion)
                        .with_count(count),
                );
            }
            for report in &reports {
                println!("Deleted {} ({} chunks)", report.source_id, report.total_chunks());
                println!("{}", table::writes(&report.collections));
            }
            0
        }
        Err(e) => report_error(&e, json),
    }
}

pub fn run_list(room: &Dataroom, json: bool) -> u8 {
    match room.list() {
        Ok(docs) => {
            if json {
                let count = docs.len();
                return print_json(
                    &Envelope::success(docs)
                        .with_entity_type(EntityType::Document)
                        .with_count(count),
                );
            }
            if docs.is_empty() {
                eprintln!("No documents indexed.");
                eprintln!("  Run 'dataroom upload <PATH>' to add some");
            } else {
                println!("{}", table::documents(&docs));
            }
            0
        }
        Err(e) => report_error(&e, json),
    }
}

pub fn run_stats(room: &Dataroom, json: bool) -> u8 {
    match room.stats() {
        Ok(stats) => {
            if json {
                let count = stats.len();
                return print_json(
                    &Envelope::success(stats)
                        .with_entity_type(EntityType::Collection)
                        .with_count(count),
                );
            }
            println!("Index: {}", room.settings().index_path.display());
            println!("Mode: {}", room.mode().as_str());
            println!("{}", table::stats(&stats));
            0
        }
        Err(e) => report_error(&e, json),
    }
}

pub fn run_reset(room: &Dataroom, yes: bool, json: bool) -> u8 {
    if !yes {
        let err = RagError::InvalidInput("reset deletes every document; pass --yes".to_string());
        return report_error(&err, json);
    }

    match room.reset() {
        Ok(removed) => {
            if json {
                let data = serde_json::json!({ "removed_chunks": removed });
                return print_json(
                    &Envelope::success(data)
                        .with_entity_type(EntityType::Collection)
                        .with_message("All collections emptied"),
                );
            }
            println!("Removed {removed} chunks from all collections");
            0
        }
        Err(e) => report_error(&e, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_meta_types() {
        let extra = parse_meta(&[
            "owner=finance".to_string(),
            "year=2024".to_string(),
            "ratio=0.5".to_string(),
            "draft=true".to_string(),
        ])
        .unwrap();
        assert_eq!(extra["owner"], MetadataValue::Str("finance".to_string()));
        assert_eq!(extra["year"], MetadataValue::Int(2024));
        assert_eq!(extra["ratio"], MetadataValue::Float(0.5));
        assert_eq!(extra["draft"], MetadataValue::Bool(true));

        assert!(parse_meta(&["novalue".to_string()]).is_err());
        assert!(parse_meta(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_expand_paths() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.csv"), "h\n1\n").unwrap();
        std::fs::write(nested.join("b.md"), "# b").unwrap();
        std::fs::write(nested.join("skip.bin"), [0u8]).unwrap();

        let root = dir.path().to_string_lossy().to_string();
        let files = expand_paths(&[root]).unwrap();
        assert_eq!(files.len(), 2);

        let pattern = format!("{}/*.csv", dir.path().display());
        let files = expand_paths(&[pattern]).unwrap();
        assert_eq!(files.len(), 1);

        let missing = format!("{}/*.pdf", dir.path().display());
        assert!(expand_paths(&[missing]).is_err());
    }
}
