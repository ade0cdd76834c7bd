//! Metadata filters translated to tantivy term queries.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tantivy::Term;
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};

use super::schema::CollectionSchema;
use crate::documents::types::Granularity;

/// Exact-match filter over stored chunk metadata.
///
/// Set fields are combined with AND. `unit_ids` matches any of its members;
/// an empty set matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_ids: Option<BTreeSet<String>>,
}

impl MetadataFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::default()
        }
    }

    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn units<I, S>(unit_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unit_ids: Some(unit_ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.source_id.is_none()
            && self.filename.is_none()
            && self.granularity.is_none()
            && self.unit_ids.is_none()
    }

    pub(crate) fn to_query(&self, schema: &CollectionSchema) -> Box<dyn Query> {
        if self.is_empty() {
            return Box::new(AllQuery);
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(source_id) = &self.source_id {
            clauses.push((Occur::Must, term(schema.source_id, source_id)));
        }
        if let Some(filename) = &self.filename {
            clauses.push((Occur::Must, term(schema.filename, filename)));
        }
        if let Some(granularity) = self.granularity {
            clauses.push((Occur::Must, term(schema.granularity, granularity.as_str())));
        }
        if let Some(unit_ids) = &self.unit_ids {
            if unit_ids.is_empty() {
                return Box::new(EmptyQuery);
            }
            let any_of: Vec<(Occur, Box<dyn Query>)> = unit_ids
                .iter()
                .map(|id| (Occur::Should, term(schema.unit_id, id)))
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(any_of))));
        }

        Box::new(BooleanQuery::new(clauses))
    }
}

fn term(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}
