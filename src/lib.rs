//! Multimodal question answering over document collections.
//!
//! Documents are parsed, chunked and embedded into persistent collections;
//! questions are answered from the retrieved chunks with citations. Start
//! from [`Dataroom`].

pub mod cli;
pub mod config;
pub mod dataroom;
pub mod documents;
pub mod error;
pub mod generation;
pub mod io;
pub mod logging;
pub mod parsing;
pub mod retrieval;
pub mod storage;
pub mod vector;

pub use config::{RetrievalMode, Settings};
pub use dataroom::Dataroom;
pub use documents::{
    Category, Chunk, ChunkId, ChunkMetadata, DocumentSummary, Granularity, MetadataValue,
    UploadMetadata, UploadReport,
};
pub use error::{RagError, RagResult};
pub use generation::{AnswerGenerator, ChatCompletionsGenerator};
pub use retrieval::{AnswerPayload, QueryIntent, RetrievalRequest, Retriever};
pub use storage::{CollectionRole, IndexStore, MetadataFilter, QueryHit};
pub use vector::MultimodalEmbedder;
