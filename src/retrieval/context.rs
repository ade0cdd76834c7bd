//! Citations and context assembly.

use serde::Serialize;

use crate::documents::types::{ChunkMetadata, Granularity};
use crate::storage::{CollectionRole, QueryHit};

const UNKNOWN: &str = "unknown";

/// Provenance of one context block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Human-readable label, e.g. `Data: people.csv, row 1`.
    pub label: String,
    pub chunk_id: String,
    pub source_id: String,
    pub filename: String,
    /// Collection the hit came from.
    pub collection: String,
    pub similarity: f32,
    /// Image stored with the cited chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

fn or_unknown(value: Option<u32>) -> String {
    value.map_or_else(|| UNKNOWN.to_string(), |v| v.to_string())
}

fn filename(metadata: &ChunkMetadata) -> &str {
    if metadata.filename.is_empty() {
        UNKNOWN
    } else {
        &metadata.filename
    }
}

/// Citation label for a chunk read from a collection with the given role.
pub fn citation_label(role: CollectionRole, metadata: &ChunkMetadata) -> String {
    let file = filename(metadata);

    let row = || format!("Data: {file}, row {}", or_unknown(metadata.row_index));

    // Table rows cite their row wherever they are stored.
    if metadata.granularity == Granularity::Row {
        return row();
    }

    match role {
        CollectionRole::Tabular => row(),
        CollectionRole::Paged => match (metadata.page, metadata.unit_index) {
            (Some(page), _) => format!("Document: {file}, page {page}"),
            // Unstructured text has no pages; cite the window ordinal instead.
            (None, Some(section)) => format!("Document: {file}, section {section}"),
            (None, None) => format!("Document: {file}, page {UNKNOWN}"),
        },
        CollectionRole::Units => format!("Case: {file}, unit {}", or_unknown(metadata.unit_index)),
        CollectionRole::Fragments => format!(
            "Case: {file}, unit {}, fragment {}",
            or_unknown(metadata.unit_index),
            or_unknown(metadata.fragment_index)
        ),
    }
}

/// Build the context string and its citations.
///
/// Each block is `[label]` on its own line followed by the chunk content.
/// Blocks keep the order of `hits`.
pub fn assemble<'a, I>(hits: I, separator: &str) -> (String, Vec<Citation>)
where
    I: IntoIterator<Item = (CollectionRole, &'a str, &'a QueryHit)>,
{
    let mut blocks = Vec::new();
    let mut citations = Vec::new();

    for (role, collection, hit) in hits {
        let label = citation_label(role, &hit.metadata);
        blocks.push(format!("[{label}]\n{}", hit.content));
        citations.push(Citation {
            label,
            chunk_id: hit.chunk_id.to_string(),
            source_id: hit.metadata.source_id.clone(),
            filename: hit.metadata.filename.clone(),
            collection: collection.to_string(),
            similarity: hit.similarity(),
            image_path: hit.metadata.image_path.clone(),
        });
    }

    (blocks.join(separator), citations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::types::{Category, ChunkId};

    fn hit(id: &str, content: &str, metadata: ChunkMetadata) -> QueryHit {
        QueryHit {
            chunk_id: ChunkId::new(id),
            content: content.to_string(),
            metadata,
            distance: 0.0,
        }
    }

    #[test]
    fn test_labels_per_role() {
        let mut page = ChunkMetadata::for_source("s", "report.pdf", Category::Paged)
            .with_granularity(Granularity::Page);
        page.page = Some(3);
        assert_eq!(
            citation_label(CollectionRole::Paged, &page),
            "Document: report.pdf, page 3"
        );

        let mut row = ChunkMetadata::for_source("s", "people.csv", Category::Tabular)
            .with_granularity(Granularity::Row);
        row.row_index = Some(1);
        assert_eq!(citation_label(CollectionRole::Tabular, &row), "Data: people.csv, row 1");
        assert_eq!(citation_label(CollectionRole::Fragments, &row), "Data: people.csv, row 1");

        let mut fragment = ChunkMetadata::for_source("s", "cases.md", Category::Paged);
        fragment.unit_index = Some(2);
        fragment.fragment_index = Some(4);
        assert_eq!(
            citation_label(CollectionRole::Fragments, &fragment),
            "Case: cases.md, unit 2, fragment 4"
        );
        assert_eq!(citation_label(CollectionRole::Units, &fragment), "Case: cases.md, unit 2");
    }

    #[test]
    fn test_unpaged_document_cites_section() {
        let mut window = ChunkMetadata::for_source("s", "memo.txt", Category::Paged)
            .with_granularity(Granularity::Paragraph);
        window.unit_index = Some(2);
        assert_eq!(
            citation_label(CollectionRole::Paged, &window),
            "Document: memo.txt, section 2"
        );
    }

    #[test]
    fn test_missing_fields_render_unknown() {
        let bare = ChunkMetadata::default();
        assert_eq!(
            citation_label(CollectionRole::Paged, &bare),
            "Document: unknown, page unknown"
        );
    }

    #[test]
    fn test_assemble_joins_in_order() {
        let mut a = ChunkMetadata::for_source("s", "a.pdf", Category::Paged);
        a.page = Some(1);
        let mut b = ChunkMetadata::for_source("t", "b.csv", Category::Tabular);
        b.row_index = Some(2);

        let first = hit("s_unit_1", "alpha", a);
        let second = hit("t_row_2", "beta", b);
        let (context, citations) = assemble(
            [
                (CollectionRole::Paged, "pdf_documents", &first),
                (CollectionRole::Tabular, "csv_documents", &second),
            ],
            "\n--\n",
        );

        assert_eq!(context, "[Document: a.pdf, page 1]\nalpha\n--\n[Data: b.csv, row 2]\nbeta");
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[1].collection, "csv_documents");
        assert_eq!(citations[0].similarity, 1.0);
    }

    #[test]
    fn test_citation_carries_image_path() {
        let mut page = ChunkMetadata::for_source("s", "scan.pdf", Category::Paged);
        page.page = Some(1);
        page.image_path = Some("/data/scan/page_1.png".to_string());
        let with_image = hit("s_unit_1", "opacity in lower lobe", page);
        let (_, citations) = assemble([(CollectionRole::Paged, "pdf_documents", &with_image)], "\n");

        assert_eq!(citations[0].image_path.as_deref(), Some("/data/scan/page_1.png"));
        let json = serde_json::to_value(&citations[0]).unwrap();
        assert_eq!(json["image_path"], "/data/scan/page_1.png");

        let (_, citations) = assemble(
            [(CollectionRole::Paged, "pdf_documents", &hit("t_unit_1", "x", ChunkMetadata::default()))],
            "\n",
        );
        let json = serde_json::to_value(&citations[0]).unwrap();
        assert!(json.get("image_path").is_none());
    }
}
