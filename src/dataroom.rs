//! The public entry point.
//!
//! [`Dataroom`] owns the settings and every component built from them. The
//! CLI and library users go through it; nothing else needs to know how the
//! store, embedder, parser and retriever are wired.

use std::path::Path;
use std::sync::Arc;

use crate::config::{RetrievalMode, Settings};
use crate::documents::{
    DeleteReport, DocumentManager, DocumentSummary, UpdateReport, UploadMetadata, UploadReport,
};
use crate::error::{RagError, RagResult};
use crate::generation::AnswerGenerator;
use crate::log_event;
use crate::parsing::{DocumentParser, LocalParser, RetryingParser};
use crate::retrieval::{
    AnswerPayload, CascadedRetriever, IntentClassifier, NO_CONTENT_ANSWER, ParallelRetriever,
    RetrievalRequest, Retriever, RuleBasedClassifier,
};
use crate::storage::{CollectionRole, CollectionStats, IndexStore};
use crate::vector::{MultimodalEmbedder, build_embedder};

pub struct Dataroom {
    settings: Settings,
    store: Arc<IndexStore>,
    embedder: Arc<MultimodalEmbedder>,
    documents: DocumentManager,
    retriever: Box<dyn Retriever>,
}

impl std::fmt::Debug for Dataroom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataroom")
            .field("index_path", &self.settings.index_path)
            .field("mode", &self.settings.retrieval.mode)
            .field("embedder", &self.embedder)
            .finish()
    }
}

impl Dataroom {
    /// Build every component from settings. Loads the embedding models.
    pub fn open(settings: Settings) -> RagResult<Self> {
        settings.validate().map_err(RagError::Config)?;

        let embedder = Arc::new(build_embedder(&settings.embedding)?);
        let parser: Arc<dyn DocumentParser> = Arc::new(RetryingParser::new(
            LocalParser::with_commands(settings.parser.commands.clone()),
            settings.parser.retry.clone(),
        ));

        Self::with_components(settings, embedder, parser, Arc::new(RuleBasedClassifier::new()))
    }

    /// Assemble from caller-provided collaborators.
    pub fn with_components(
        settings: Settings,
        embedder: Arc<MultimodalEmbedder>,
        parser: Arc<dyn DocumentParser>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> RagResult<Self> {
        settings.validate().map_err(RagError::Config)?;

        let store = Arc::new(IndexStore::open(
            &settings.index_path,
            &CollectionRole::ALL,
            &settings.collections,
            &settings.storage,
            |layout| embedder.dimension(layout).ok(),
        )?);

        let mode = settings.retrieval.mode;
        let documents = DocumentManager::new(
            store.clone(),
            embedder.clone(),
            parser,
            settings.chunking.clone(),
            mode,
        )?;

        let retriever: Box<dyn Retriever> = match mode {
            RetrievalMode::Parallel => Box::new(ParallelRetriever::new(
                store.clone(),
                embedder.clone(),
                settings.retrieval.clone(),
            )?),
            RetrievalMode::Cascaded => Box::new(CascadedRetriever::new(
                store.clone(),
                embedder.clone(),
                classifier,
                settings.retrieval.clone(),
            )?),
        };

        log_event!("dataroom", "opened", "{} ({} mode)", settings.index_path.display(), mode.as_str());

        Ok(Self {
            settings,
            store,
            embedder,
            documents,
            retriever,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> RetrievalMode {
        self.retriever.mode()
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn upload(&self, path: &Path, metadata: UploadMetadata) -> RagResult<UploadReport> {
        self.documents.upload(path, metadata)
    }

    pub fn update(&self, path: &Path, metadata: UploadMetadata) -> RagResult<UpdateReport> {
        self.documents.update(path, metadata)
    }

    pub fn delete(&self, source_id: &str) -> RagResult<DeleteReport> {
        self.documents.delete(source_id)
    }

    pub fn delete_by_filename(&self, filename: &str) -> RagResult<Vec<DeleteReport>> {
        self.documents.delete_by_filename(filename)
    }

    pub fn list(&self) -> RagResult<Vec<DocumentSummary>> {
        self.documents.list()
    }

    pub fn stats(&self) -> RagResult<Vec<CollectionStats>> {
        self.documents.stats()
    }

    pub fn reset(&self) -> RagResult<usize> {
        self.documents.reset()
    }

    /// Retrieve context for a question without generating an answer.
    pub fn retrieve(&self, request: &RetrievalRequest) -> RagResult<AnswerPayload> {
        self.retriever.retrieve(request)
    }

    /// Retrieve, then hand the context to `generator`.
    ///
    /// When retrieval finds nothing the generator is not called and the
    /// payload carries a fixed apology instead.
    pub async fn answer(
        &self,
        request: &RetrievalRequest,
        generator: &dyn AnswerGenerator,
    ) -> RagResult<AnswerPayload> {
        let mut payload = self.retrieve(request)?;

        if !payload.found() {
            payload.answer = Some(NO_CONTENT_ANSWER.to_string());
            return Ok(payload);
        }

        let question = payload
            .query
            .clone()
            .unwrap_or_else(|| self.settings.retrieval.image_fallback_text.clone());
        let answer = generator.generate(&payload.answer_context, &question).await?;
        payload.answer = Some(answer);
        Ok(payload)
    }
}
