//! Single-stage retrieval over the paged and tabular collections.

use std::sync::Arc;

use rayon::prelude::*;

use super::context::assemble;
use super::{AnswerPayload, QueryIntent, RetrievalRequest, Retriever, Stage, StageHits};
use crate::config::{RetrievalConfig, RetrievalMode};
use crate::debug_event;
use crate::documents::types::Category;
use crate::error::{RagError, RagResult};
use crate::storage::{CollectionRole, IndexStore, MetadataFilter, StorageError};
use crate::vector::{MultimodalEmbedder, VectorLayout};

/// Embeds the question once and queries each category's collection
/// independently. Paged hits come before tabular hits in the context.
#[derive(Debug)]
pub struct ParallelRetriever {
    store: Arc<IndexStore>,
    embedder: Arc<MultimodalEmbedder>,
    config: RetrievalConfig,
}

impl ParallelRetriever {
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<MultimodalEmbedder>,
        config: RetrievalConfig,
    ) -> RagResult<Self> {
        for role in [CollectionRole::Paged, CollectionRole::Tabular] {
            store.collection(role)?;
        }
        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    fn targets(&self, category: Option<Category>) -> Vec<(CollectionRole, usize)> {
        [
            (CollectionRole::Paged, Category::Paged, self.config.paged_k),
            (CollectionRole::Tabular, Category::Tabular, self.config.tabular_k),
        ]
        .into_iter()
        .filter(|(_, c, _)| category.is_none_or(|wanted| wanted == *c))
        .map(|(role, _, k)| (role, k))
        .collect()
    }
}

impl Retriever for ParallelRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Parallel
    }

    fn retrieve(&self, request: &RetrievalRequest) -> RagResult<AnswerPayload> {
        request.validate()?;
        let text = request.query_text().ok_or_else(|| {
            RagError::InvalidInput("single-stage retrieval needs query text".to_string())
        })?;

        let embedding = self.embedder.embed(Some(text), None, VectorLayout::Text)?;
        let targets = self.targets(request.category);

        // Collect keeps target order, so results do not depend on scheduling.
        let stages = targets
            .par_iter()
            .map(|(role, k)| -> Result<StageHits, StorageError> {
                let collection = self.store.collection(*role)?;
                let hits = collection.query(&embedding, *k, &MetadataFilter::all())?;
                debug_event!("retrieval", "queried", "'{}' returned {} hits", collection.name(), hits.len());
                Ok(StageHits {
                    stage: Stage::Single,
                    role: *role,
                    collection: collection.name().to_string(),
                    scope: Vec::new(),
                    hits,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut payload = AnswerPayload::new(request, QueryIntent::TextOnly);
        let (context, citations) = assemble(
            stages
                .iter()
                .flat_map(|s| s.hits.iter().map(move |h| (s.role, s.collection.as_str(), h))),
            &self.config.separator,
        );
        payload.answer_context = context;
        payload.citations = citations;
        let images: Vec<String> = payload
            .citations
            .iter()
            .filter_map(|c| c.image_path.clone())
            .collect();
        for path in &images {
            payload.push_image_path(path);
        }

        let empty = stages.iter().all(|s| s.hits.is_empty());
        payload.stages = stages;
        if empty {
            return Ok(payload.no_content(Stage::Single));
        }
        Ok(payload)
    }
}
