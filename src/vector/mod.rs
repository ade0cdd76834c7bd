//! Embedding generation and vector math.
//!
//! - [`MultimodalEmbedder`] owns the per-modality generators and produces
//!   normalized vectors in a [`VectorLayout`].
//! - [`fastembed`] wraps local ONNX models (CLIP ViT-B/32 by default).
//! - [`hashed`] provides deterministic offline generators.

pub mod embedder;
pub mod fastembed;
pub mod hashed;
pub mod math;
pub mod types;

use std::sync::Arc;

pub use embedder::{
    DEFAULT_BATCH_SIZE, EmbedInput, EmbeddingGenerator, ImageEmbeddingGenerator,
    MultimodalEmbedder, VectorLayout,
};
pub use fastembed::{FastEmbedGenerator, FastEmbedImageGenerator};
pub use hashed::{HASHED_MODEL, HashedImageGenerator, HashedTokenGenerator};
pub use math::{cosine_distance, cosine_similarity, display_similarity};
pub use types::{VectorDimension, VectorError};

use crate::config::EmbeddingConfig;

/// `embedding.image_model` value that disables the image tower.
pub const NO_IMAGE_MODEL: &str = "none";

/// Build the embedder described by `[embedding]`.
///
/// Models are loaded here, so this may download weights on first use.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<MultimodalEmbedder, VectorError> {
    let hashed_dimension = VectorDimension::new(config.hashed_dimension)?;
    let cache_dir = config.model_cache_dir();

    let text: Arc<dyn EmbeddingGenerator> = if config.model.eq_ignore_ascii_case(HASHED_MODEL) {
        Arc::new(HashedTokenGenerator::new(hashed_dimension))
    } else {
        Arc::new(FastEmbedGenerator::new(
            &config.model,
            cache_dir.clone(),
            config.show_download_progress,
        )?)
    };

    let mut embedder = MultimodalEmbedder::new(text).with_batch_size(config.batch_size);

    let image_model = config.image_model.trim();
    if image_model.eq_ignore_ascii_case(NO_IMAGE_MODEL) || image_model.is_empty() {
        tracing::debug!(target: "vector", "Image model disabled");
    } else if image_model.eq_ignore_ascii_case(HASHED_MODEL) {
        embedder = embedder.with_image(Arc::new(HashedImageGenerator::new(hashed_dimension)));
    } else {
        embedder = embedder.with_image(Arc::new(FastEmbedImageGenerator::new(
            image_model,
            cache_dir,
            config.show_download_progress,
        )?));
    }

    tracing::info!(target: "vector", "Embedder ready: {embedder:?}");
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_hashed_embedder() {
        let config = EmbeddingConfig {
            model: "hashed".to_string(),
            image_model: "hashed".to_string(),
            hashed_dimension: 32,
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(VectorLayout::Text).unwrap().get(), 32);
        assert_eq!(embedder.dimension(VectorLayout::TextImage).unwrap().get(), 64);
    }

    #[test]
    fn test_image_model_none() {
        let config = EmbeddingConfig {
            model: "hashed".to_string(),
            image_model: "none".to_string(),
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert!(!embedder.supports(VectorLayout::TextImage));
    }
}
