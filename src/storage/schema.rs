//! Tantivy schema for a chunk collection.
//!
//! Filterable metadata is duplicated into `STRING` fields so filters run as
//! term queries. The full metadata record is stored as JSON and the
//! embedding as raw little-endian f32 bytes.

use tantivy::schema::{FAST, Field, STORED, STRING, Schema, SchemaBuilder};

#[derive(Debug, Clone)]
pub struct CollectionSchema {
    /// Unique chunk identifier.
    pub chunk_id: Field,

    /// Owning source document.
    pub source_id: Field,

    /// Original file name, for duplicate detection and citations.
    pub filename: Field,

    /// Coarse unit a fragment belongs to. Empty for non-fragments.
    pub unit_id: Field,

    pub granularity: Field,

    pub category: Field,

    /// Chunk text, stored only.
    pub content: Field,

    /// `ChunkMetadata` as JSON.
    pub metadata: Field,

    /// Embedding bytes.
    pub embedding: Field,

    /// Insertion time (UTC seconds).
    pub indexed_at: Field,
}

impl CollectionSchema {
    pub fn build() -> (Schema, Self) {
        let mut builder = SchemaBuilder::default();

        let chunk_id = builder.add_text_field("chunk_id", STRING | STORED);
        let source_id = builder.add_text_field("source_id", STRING | STORED | FAST);
        let filename = builder.add_text_field("filename", STRING | STORED);
        let unit_id = builder.add_text_field("unit_id", STRING | STORED);
        let granularity = builder.add_text_field("granularity", STRING | STORED);
        let category = builder.add_text_field("category", STRING | STORED);

        let content = builder.add_text_field("content", STORED);
        let metadata = builder.add_text_field("metadata", STORED);
        let embedding = builder.add_bytes_field("embedding", STORED);
        let indexed_at = builder.add_u64_field("indexed_at", STORED | FAST);

        let schema = builder.build();

        (
            schema,
            Self {
                chunk_id,
                source_id,
                filename,
                unit_id,
                granularity,
                category,
                content,
                metadata,
                embedding,
                indexed_at,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_build() {
        let (schema, _fields) = CollectionSchema::build();

        for name in ["chunk_id", "source_id", "filename", "unit_id", "embedding"] {
            assert!(schema.get_field(name).is_ok(), "missing {name}");
        }
        assert_eq!(schema.fields().count(), 10);
    }
}
