//! Two-stage retrieval: coarse units, then fragments of the best units.
//!
//! Stage 1 embeds the query according to its intent and searches the unit
//! collection. The top `narrow_to` units become the scope of stage 2, a
//! text-only search of the fragment collection filtered by `unit_id`.
//! Fragments of any other unit are never considered.

use std::path::Path;
use std::sync::Arc;

use super::context::assemble;
use super::intent::{IntentClassifier, QueryIntent};
use super::{AnswerPayload, RetrievalRequest, Retriever, Stage, StageHits};
use crate::config::{RetrievalConfig, RetrievalMode};
use crate::error::{RagError, RagResult};
use crate::storage::{CollectionRole, IndexStore, MetadataFilter, QueryHit};
use crate::vector::{MultimodalEmbedder, VectorLayout};
use crate::{debug_event, log_event};

pub struct CascadedRetriever {
    store: Arc<IndexStore>,
    embedder: Arc<MultimodalEmbedder>,
    classifier: Arc<dyn IntentClassifier>,
    config: RetrievalConfig,
}

impl std::fmt::Debug for CascadedRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadedRetriever")
            .field("unit_k", &self.config.unit_k)
            .field("fragment_k", &self.config.fragment_k)
            .field("narrow_to", &self.config.narrow_to)
            .finish()
    }
}

impl CascadedRetriever {
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<MultimodalEmbedder>,
        classifier: Arc<dyn IntentClassifier>,
        config: RetrievalConfig,
    ) -> RagResult<Self> {
        for role in [CollectionRole::Units, CollectionRole::Fragments] {
            if store.get(role).is_none() {
                return Err(RagError::InvalidInput(format!(
                    "cascaded retrieval needs the {role} collection; configure an image model"
                )));
            }
        }
        Ok(Self {
            store,
            embedder,
            classifier,
            config,
        })
    }

    fn classify(&self, text: Option<&str>, image: Option<&Path>) -> QueryIntent {
        match self.classifier.classify(text, image.is_some()) {
            Ok(label) => QueryIntent::from_label(&label),
            Err(e) => {
                tracing::warn!(target: "retrieval", "{e}; treating query as mixed");
                QueryIntent::Mixed
            }
        }
    }

    /// Modalities that drive stage 1. Falls back to everything the query has
    /// when the intent would drop the only modality present.
    fn coarse_inputs<'a>(
        intent: QueryIntent,
        text: Option<&'a str>,
        image: Option<&'a Path>,
    ) -> (Option<&'a str>, Option<&'a Path>) {
        let routed = match intent {
            QueryIntent::TextOnly => (text, None),
            QueryIntent::ImageOnly => (None, image),
            QueryIntent::Mixed => (text, image),
        };
        match routed {
            (None, None) => (text, image),
            other => other,
        }
    }

    /// Unit ids of the best `narrow_to` coarse hits, in rank order.
    fn narrow(&self, hits: &[QueryHit]) -> Vec<String> {
        let mut scope: Vec<String> = Vec::new();
        for hit in hits {
            if scope.len() >= self.config.narrow_to.max(1) {
                break;
            }
            let unit_id = hit
                .metadata
                .unit_id
                .clone()
                .unwrap_or_else(|| hit.chunk_id.to_string());
            if !scope.contains(&unit_id) {
                scope.push(unit_id);
            }
        }
        scope
    }
}

impl Retriever for CascadedRetriever {
    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Cascaded
    }

    fn retrieve(&self, request: &RetrievalRequest) -> RagResult<AnswerPayload> {
        request.validate()?;
        let text = request.query_text();
        let image = request.image_path();

        let intent = self.classify(text, image);
        let mut payload = AnswerPayload::new(request, intent);

        // Stage 1
        let units = self.store.collection(CollectionRole::Units)?;
        let (coarse_text, coarse_image) = Self::coarse_inputs(intent, text, image);
        let coarse_embedding = self
            .embedder
            .embed(coarse_text, coarse_image, VectorLayout::TextImage)?;
        let coarse = units.query(&coarse_embedding, self.config.unit_k, &MetadataFilter::all())?;
        debug_event!("retrieval", "coarse", "{} units for {} query", coarse.len(), intent.as_str());

        let scope = self.narrow(&coarse);
        payload.stages.push(StageHits {
            stage: Stage::Coarse,
            role: CollectionRole::Units,
            collection: units.name().to_string(),
            scope: Vec::new(),
            hits: coarse,
        });
        if scope.is_empty() {
            return Ok(payload.no_content(Stage::Coarse));
        }

        // Stage 2
        let fragments = self.store.collection(CollectionRole::Fragments)?;
        let fine_text = text.unwrap_or(&self.config.image_fallback_text);
        let fine_embedding = self.embedder.embed(Some(fine_text), None, VectorLayout::Text)?;
        let fine = fragments.query(
            &fine_embedding,
            self.config.fragment_k,
            &MetadataFilter::units(scope.iter().cloned()),
        )?;
        debug_event!("retrieval", "fine", "{} fragments within {scope:?}", fine.len());

        let found = !fine.is_empty();
        payload.stages.push(StageHits {
            stage: Stage::Fine,
            role: CollectionRole::Fragments,
            collection: fragments.name().to_string(),
            scope,
            hits: fine,
        });
        if !found {
            return Ok(payload.no_content(Stage::Fine));
        }

        let (context, citations) = {
            let stage = &payload.stages[1];
            assemble(
                stage
                    .hits
                    .iter()
                    .map(|h| (stage.role, stage.collection.as_str(), h)),
                &self.config.separator,
            )
        };
        payload.answer_context = context;
        payload.citations = citations;

        let scope = &payload.stages[1].scope;
        let images: Vec<String> = payload.stages[0]
            .hits
            .iter()
            .filter(|h| h.metadata.unit_id.as_ref().is_some_and(|u| scope.contains(u)))
            .filter_map(|h| h.metadata.image_path.clone())
            .collect();
        for path in &images {
            payload.push_image_path(path);
        }

        log_event!("retrieval", "answered", "{} fragments, intent {}", payload.citations.len(), intent.as_str());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::documents::config::CollectionsConfig;
    use crate::documents::types::{Category, Chunk, ChunkId, ChunkMetadata, Granularity};
    use crate::retrieval::{IntentError, RetrievalStatus, RuleBasedClassifier};
    use crate::vector::{EmbedInput, HashedImageGenerator, HashedTokenGenerator, VectorDimension};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<IndexStore>,
        embedder: Arc<MultimodalEmbedder>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let dim = VectorDimension::new(128).unwrap();
        let embedder = Arc::new(
            MultimodalEmbedder::new(Arc::new(HashedTokenGenerator::new(dim)))
                .with_image(Arc::new(HashedImageGenerator::new(dim))),
        );
        let store = IndexStore::open(
            dir.path(),
            &[CollectionRole::Units, CollectionRole::Fragments],
            &CollectionsConfig::default(),
            &StorageConfig::default(),
            |layout| embedder.dimension(layout).ok(),
        )
        .unwrap();
        Fixture {
            dir,
            store: Arc::new(store),
            embedder,
        }
    }

    fn unit(source: &str, index: u32, content: &str) -> Chunk {
        let id = ChunkId::unit(source, index);
        let mut m = ChunkMetadata::for_source(source, "cases.md", Category::Paged)
            .with_granularity(Granularity::Case);
        m.unit_index = Some(index);
        m.unit_id = Some(id.to_string());
        Chunk::new(id, content, m)
    }

    fn fragment(unit: &Chunk, ordinal: u32, content: &str) -> Chunk {
        let mut m = unit.metadata.clone().with_granularity(Granularity::Paragraph);
        m.fragment_index = Some(ordinal);
        Chunk::new(ChunkId::fragment(unit.id.as_str(), ordinal), content, m)
    }

    fn load(f: &Fixture, units: &[Chunk], fragments: &[Chunk]) {
        let inputs: Vec<EmbedInput<'_>> = units.iter().map(|c| EmbedInput::text(&c.content)).collect();
        let unit_vectors = f.embedder.embed_inputs(&inputs, VectorLayout::TextImage).unwrap();
        f.store
            .collection(CollectionRole::Units)
            .unwrap()
            .insert_chunks(units, &unit_vectors)
            .unwrap();

        let texts: Vec<&str> = fragments.iter().map(|c| c.content.as_str()).collect();
        let fragment_vectors = f.embedder.embed_many(&texts).unwrap();
        f.store
            .collection(CollectionRole::Fragments)
            .unwrap()
            .insert_chunks(fragments, &fragment_vectors)
            .unwrap();
    }

    fn retriever(f: &Fixture, config: RetrievalConfig) -> CascadedRetriever {
        CascadedRetriever::new(
            f.store.clone(),
            f.embedder.clone(),
            Arc::new(RuleBasedClassifier::new()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_fine_stage_scoped_to_best_unit() {
        let f = fixture();
        let a = unit("cases", 1, "fever cough fatigue pneumonia");
        let b = unit("cases", 2, "wrist fracture fall cast");
        // Fragment of B matches the query text better than A's fragment.
        let fragments = vec![
            fragment(&a, 1, "chest x-ray showed pneumonia"),
            fragment(&b, 1, "fever fever fever after the fall"),
        ];
        load(&f, &[a.clone(), b], &fragments);

        let payload = retriever(&f, RetrievalConfig::default())
            .retrieve(&RetrievalRequest::text("fever cough pneumonia"))
            .unwrap();

        assert!(payload.found());
        assert_eq!(payload.intent, QueryIntent::TextOnly);
        assert_eq!(payload.stages[1].scope, vec![a.id.to_string()]);
        assert!(payload
            .hits(Stage::Fine)
            .all(|h| h.metadata.unit_id.as_deref() == Some(a.id.as_str())));
        assert_eq!(payload.citations[0].label, "Case: cases.md, unit 1, fragment 1");
    }

    #[test]
    fn test_narrow_to_widens_scope() {
        let f = fixture();
        let a = unit("cases", 1, "fever cough");
        let b = unit("cases", 2, "fever rash");
        load(
            &f,
            &[a.clone(), b.clone()],
            &[fragment(&a, 1, "fever cough notes"), fragment(&b, 1, "fever rash notes")],
        );

        let config = RetrievalConfig {
            narrow_to: 2,
            ..RetrievalConfig::default()
        };
        let payload = retriever(&f, config)
            .retrieve(&RetrievalRequest::text("fever"))
            .unwrap();
        assert_eq!(payload.stages[1].scope.len(), 2);
        assert_eq!(payload.hits(Stage::Fine).count(), 2);
    }

    #[test]
    fn test_empty_units_short_circuit() {
        let f = fixture();
        let payload = retriever(&f, RetrievalConfig::default())
            .retrieve(&RetrievalRequest::text("fever"))
            .unwrap();
        assert_eq!(
            payload.status,
            RetrievalStatus::NoRelevantContent { stage: Stage::Coarse }
        );
        assert_eq!(payload.stages.len(), 1);
    }

    #[test]
    fn test_unit_without_fragments_reports_fine_stage() {
        let f = fixture();
        load(&f, &[unit("cases", 1, "fever cough")], &[]);

        let payload = retriever(&f, RetrievalConfig::default())
            .retrieve(&RetrievalRequest::text("fever"))
            .unwrap();
        assert_eq!(
            payload.status,
            RetrievalStatus::NoRelevantContent { stage: Stage::Fine }
        );
        assert!(payload.citations.is_empty());
    }

    #[test]
    fn test_image_only_query_uses_fallback_text() {
        let f = fixture();
        let a = unit("cases", 1, "fever cough");
        load(&f, &[a.clone()], &[fragment(&a, 1, "image analysis of the chest")]);

        let image = f.dir.path().join("scan.png");
        std::fs::write(&image, b"\x89PNG fake pixels").unwrap();

        let payload = retriever(&f, RetrievalConfig::default())
            .retrieve(&RetrievalRequest::image(&image))
            .unwrap();
        assert_eq!(payload.intent, QueryIntent::ImageOnly);
        assert!(payload.query.is_none());
        assert!(payload.found());
    }

    #[test]
    fn test_matched_unit_images_are_surfaced() {
        let f = fixture();
        let mut a = unit("cases", 1, "femur fracture displaced");
        a.metadata.image_path = Some("/scans/femur.png".to_string());
        let mut b = unit("cases", 2, "skin rash itching");
        b.metadata.image_path = Some("/scans/rash.png".to_string());
        load(
            &f,
            &[a.clone(), b.clone()],
            &[fragment(&a, 1, "femur fracture fixed with a rod"), fragment(&b, 1, "rash cream")],
        );

        let payload = retriever(&f, RetrievalConfig::default())
            .retrieve(&RetrievalRequest::text("femur fracture"))
            .unwrap();
        assert!(payload.found());
        assert_eq!(payload.image_paths, vec!["/scans/femur.png".to_string()]);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["image_paths"][0], "/scans/femur.png");
    }

    #[test]
    fn test_classifier_failure_is_absorbed() {
        struct Failing;
        impl IntentClassifier for Failing {
            fn classify(&self, _: Option<&str>, _: bool) -> Result<String, IntentError> {
                Err(IntentError("model offline".to_string()))
            }
        }

        let f = fixture();
        let a = unit("cases", 1, "fever cough");
        load(&f, &[a.clone()], &[fragment(&a, 1, "fever notes")]);

        let retriever = CascadedRetriever::new(
            f.store.clone(),
            f.embedder.clone(),
            Arc::new(Failing),
            RetrievalConfig::default(),
        )
        .unwrap();
        let payload = retriever.retrieve(&RetrievalRequest::text("fever")).unwrap();
        assert_eq!(payload.intent, QueryIntent::Mixed);
        assert!(payload.found());
    }

    #[test]
    fn test_coarse_inputs_fallback() {
        let image = Path::new("x.png");
        assert_eq!(
            CascadedRetriever::coarse_inputs(QueryIntent::ImageOnly, Some("t"), None),
            (Some("t"), None)
        );
        assert_eq!(
            CascadedRetriever::coarse_inputs(QueryIntent::TextOnly, Some("t"), Some(image)),
            (Some("t"), None)
        );
        assert_eq!(
            CascadedRetriever::coarse_inputs(QueryIntent::Mixed, Some("t"), Some(image)),
            (Some("t"), Some(image))
        );
    }

    #[test]
    fn test_requires_cascaded_collections() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(MultimodalEmbedder::new(Arc::new(HashedTokenGenerator::new(
            VectorDimension::new(16).unwrap(),
        ))));
        // Without an image model the unit collection is not opened.
        let store = IndexStore::open(
            dir.path(),
            &CollectionRole::ALL,
            &CollectionsConfig::default(),
            &StorageConfig::default(),
            |layout| embedder.dimension(layout).ok(),
        )
        .unwrap();
        let result = CascadedRetriever::new(
            Arc::new(store),
            embedder,
            Arc::new(RuleBasedClassifier::new()),
            RetrievalConfig::default(),
        );
        assert!(matches!(result, Err(RagError::InvalidInput(_))));
    }
}
