//! Query-time retrieval.
//!
//! Two retrievers share the [`Retriever`] contract:
//! - [`ParallelRetriever`]: one stage over the paged and tabular collections
//! - [`CascadedRetriever`]: coarse units first, then fragments scoped to the
//!   best units
//!
//! Both return an [`AnswerPayload`] holding the assembled context, its
//! citations and the raw hits of every stage. Turning the context into an
//! answer is left to [`crate::generation`].

pub mod cascade;
pub mod context;
pub mod intent;
pub mod parallel;

pub use cascade::CascadedRetriever;
pub use context::{Citation, assemble, citation_label};
pub use intent::{IntentClassifier, IntentError, QueryIntent, RuleBasedClassifier};
pub use parallel::ParallelRetriever;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::RetrievalMode;
use crate::documents::types::Category;
use crate::error::{RagError, RagResult};
use crate::storage::{CollectionRole, QueryHit};

/// Answer used when no stage found anything.
pub const NO_CONTENT_ANSWER: &str =
    "Sorry, no relevant document content was found to answer your question.";

/// A question: text, an image, or both.
#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub text: Option<String>,
    pub image: Option<PathBuf>,
    /// Restrict single-stage retrieval to one category.
    pub category: Option<Category>,
}

impl RetrievalRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            image: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Query text, `None` when absent or blank.
    pub fn query_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.query_text().is_none() && self.image.is_none() {
            return Err(RagError::InvalidInput(
                "a query needs text, an image, or both".to_string(),
            ));
        }
        if let Some(image) = &self.image {
            if !image.is_file() {
                return Err(RagError::InvalidInput(format!(
                    "image not found: {}",
                    image.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The only stage of single-stage retrieval.
    Single,
    Coarse,
    Fine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalStatus {
    Found,
    NoRelevantContent { stage: Stage },
}

/// Raw hits of one query against one collection.
#[derive(Debug, Clone, Serialize)]
pub struct StageHits {
    pub stage: Stage,
    pub role: CollectionRole,
    pub collection: String,
    /// Unit ids the query was restricted to; empty when unrestricted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    pub hits: Vec<QueryHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerPayload {
    pub query: Option<String>,
    pub image: Option<String>,
    pub intent: QueryIntent,
    pub status: RetrievalStatus,
    pub answer_context: String,
    pub citations: Vec<Citation>,
    /// Images of the matched coarse units, then of cited chunks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_paths: Vec<String>,
    pub stages: Vec<StageHits>,
    /// Generated answer, filled in after retrieval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl AnswerPayload {
    pub(crate) fn new(request: &RetrievalRequest, intent: QueryIntent) -> Self {
        Self {
            query: request.query_text().map(str::to_string),
            image: request.image.as_ref().map(|p| p.display().to_string()),
            intent,
            status: RetrievalStatus::Found,
            answer_context: String::new(),
            citations: Vec::new(),
            image_paths: Vec::new(),
            stages: Vec::new(),
            answer: None,
        }
    }

    /// Stop with nothing found at `stage`.
    pub(crate) fn no_content(mut self, stage: Stage) -> Self {
        self.status = RetrievalStatus::NoRelevantContent { stage };
        self.answer_context.clear();
        self.citations.clear();
        self.image_paths.clear();
        self
    }

    /// Record an image path once, keeping first-seen order.
    pub(crate) fn push_image_path(&mut self, path: &str) {
        if !self.image_paths.iter().any(|p| p == path) {
            self.image_paths.push(path.to_string());
        }
    }

    pub fn found(&self) -> bool {
        self.status == RetrievalStatus::Found
    }

    /// Hits of the given stage across its collections.
    pub fn hits(&self, stage: Stage) -> impl Iterator<Item = &QueryHit> {
        self.stages
            .iter()
            .filter(move |s| s.stage == stage)
            .flat_map(|s| s.hits.iter())
    }
}

/// A retrieval variant.
pub trait Retriever: Send + Sync {
    fn mode(&self) -> RetrievalMode;

    fn retrieve(&self, request: &RetrievalRequest) -> RagResult<AnswerPayload>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_request_validation() {
        assert!(RetrievalRequest::text("  ").validate().is_err());
        assert!(RetrievalRequest::default().validate().is_err());
        assert!(RetrievalRequest::image("/nonexistent/x.png").validate().is_err());
        assert!(RetrievalRequest::text("Alice").validate().is_ok());

        let dir = TempDir::new().unwrap();
        let image = dir.path().join("scan.png");
        std::fs::write(&image, [1u8, 2, 3, 4, 5]).unwrap();
        assert!(RetrievalRequest::image(&image).validate().is_ok());
    }

    #[test]
    fn test_status_serialization() {
        let status = RetrievalStatus::NoRelevantContent {
            stage: Stage::Coarse,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["kind"], "no_relevant_content");
        assert_eq!(json["stage"], "coarse");
    }
}
