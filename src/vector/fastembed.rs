//! fastembed-backed generators for the CLIP ViT-B/32 text and vision towers.

use std::path::{Path, PathBuf};

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use parking_lot::Mutex;

use super::embedder::{EmbeddingGenerator, ImageEmbeddingGenerator};
use super::types::{VectorDimension, VectorError};

/// Single grey pixel, RGB, 8 bits per channel.
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53,
    0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x68, 0x68, 0x68, 0x00,
    0x00, 0x03, 0x04, 0x01, 0x81, 0x4b, 0xd3, 0xd2, 0x10, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e,
    0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Text models selectable by name in settings.
const TEXT_MODELS: &[(&str, EmbeddingModel)] = &[
    ("ClipVitB32", EmbeddingModel::ClipVitB32),
    ("AllMiniLML6V2", EmbeddingModel::AllMiniLML6V2),
    ("BGESmallENV15", EmbeddingModel::BGESmallENV15),
    ("MultilingualE5Small", EmbeddingModel::MultilingualE5Small),
];

/// Image models selectable by name in settings.
const IMAGE_MODELS: &[(&str, ImageEmbeddingModel)] =
    &[("ClipVitB32", ImageEmbeddingModel::ClipVitB32)];

pub fn parse_text_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    TEXT_MODELS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, m)| m.clone())
        .ok_or_else(|| VectorError::UnknownModel(name.to_string()))
}

pub fn parse_image_model(name: &str) -> Result<ImageEmbeddingModel, VectorError> {
    IMAGE_MODELS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, m)| m.clone())
        .ok_or_else(|| VectorError::UnknownModel(name.to_string()))
}

/// Text generator backed by a local ONNX model.
pub struct FastEmbedGenerator {
    /// `embed` takes `&mut self`.
    model: Mutex<TextEmbedding>,
    dimension: VectorDimension,
    name: String,
}

impl FastEmbedGenerator {
    pub fn new(
        name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_text_model(name)?;

        tracing::info!(target: "vector", "Loading text model {name} (cache: {})", cache_dir.display());

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::ModelInit(e.to_string()))?;

        // Width is whatever the model actually returns.
        let sample = text_model
            .embed(vec!["test"], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))?;
        let width = sample.first().map(Vec::len).unwrap_or_default();
        let dimension = VectorDimension::new(width)?;

        tracing::debug!(target: "vector", "Text model {name} ready, dimension {width}");

        Ok(Self {
            model: Mutex::new(text_model),
            dimension,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model
            .lock()
            .embed(texts.to_vec(), None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Image generator backed by a local ONNX vision model.
pub struct FastEmbedImageGenerator {
    model: Mutex<ImageEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedImageGenerator {
    pub fn new(
        name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let model = parse_image_model(name)?;

        tracing::info!(target: "vector", "Loading image model {name}");

        let mut image_model = ImageEmbedding::try_new(
            ImageInitOptions::new(model)
                .with_cache_dir(cache_dir.clone())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::ModelInit(e.to_string()))?;

        // The vision tower only reads files; measure it on a 1x1 pixel.
        let pixel_path = cache_dir.join(".dimension-check.png");
        std::fs::write(&pixel_path, PIXEL_PNG)
            .map_err(|e| VectorError::ModelInit(format!("{}: {e}", pixel_path.display())))?;
        let sample = image_model
            .embed(vec![pixel_path.as_path()], None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()));
        let _ = std::fs::remove_file(&pixel_path);
        let width = sample?.first().map(Vec::len).unwrap_or_default();
        let dimension = VectorDimension::new(width)?;

        tracing::debug!(target: "vector", "Image model {name} ready, dimension {width}");

        Ok(Self {
            model: Mutex::new(image_model),
            dimension,
        })
    }
}

impl ImageEmbeddingGenerator for FastEmbedImageGenerator {
    fn generate_image_embeddings(&self, images: &[&Path]) -> Result<Vec<Vec<f32>>, VectorError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        self.model
            .lock()
            .embed(images.to_vec(), None)
            .map_err(|e| VectorError::EmbeddingFailed(e.to_string()))
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
