//! Tables for human-readable command output.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};

use crate::documents::{CollectionWrite, DocumentSummary};
use crate::retrieval::Citation;
use crate::storage::CollectionStats;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn documents(docs: &[DocumentSummary]) -> Table {
    let mut t = table(vec![
        "Filename", "Source id", "Category", "Units", "Rows", "Fragments", "Uploaded",
    ]);
    for doc in docs {
        t.add_row(vec![
            doc.filename.clone(),
            doc.source_id.clone(),
            doc.category.as_str().to_string(),
            doc.units.to_string(),
            doc.rows.to_string(),
            doc.fragments.to_string(),
            doc.upload_time.clone().unwrap_or_else(|| "unknown".to_string()),
        ]);
    }
    t
}

pub fn stats(stats: &[CollectionStats]) -> Table {
    let mut t = table(vec!["Collection", "Role", "Chunks", "Documents", "Dimension"]);
    for s in stats {
        t.add_row(vec![
            s.name.clone(),
            s.role.to_string(),
            s.chunks.to_string(),
            s.sources.to_string(),
            s.dimension.to_string(),
        ]);
    }
    t
}

pub fn writes(writes: &[CollectionWrite]) -> Table {
    let mut t = table(vec!["Collection", "Chunks"]);
    for w in writes {
        t.add_row(vec![w.collection.clone(), w.chunks.to_string()]);
    }
    t
}

pub fn citations(citations: &[Citation]) -> Table {
    let with_images = citations.iter().any(|c| c.image_path.is_some());
    let mut header = vec!["#", "Source", "Similarity"];
    if with_images {
        header.push("Image");
    }

    let mut t = table(header);
    for (i, c) in citations.iter().enumerate() {
        let mut row = vec![
            (i + 1).to_string(),
            c.label.clone(),
            format!("{:.3}", c.similarity),
        ];
        if with_images {
            row.push(c.image_path.clone().unwrap_or_default());
        }
        t.add_row(row);
    }
    t
}
