//! Multimodal embedding on top of per-modality generators.
//!
//! Each modality is produced by its own generator and L2-normalized here,
//! regardless of what the model already does. A [`VectorLayout`] decides the
//! final shape:
//!
//! - `Text`: the normalized text vector.
//! - `TextImage`: `[text | image]`, where an absent modality contributes a
//!   zero slice of its own width. Similarity is therefore biased toward the
//!   modalities that are populated.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::math::l2_normalize;
use super::types::{VectorDimension, VectorError};

/// Trait for text embedding generation.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate one embedding per input text, in input order.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Width of every returned embedding.
    fn dimension(&self) -> VectorDimension;
}

/// Trait for image embedding generation from image files.
pub trait ImageEmbeddingGenerator: Send + Sync {
    /// Generate one embedding per image path, in input order.
    fn generate_image_embeddings(&self, images: &[&Path]) -> Result<Vec<Vec<f32>>, VectorError>;

    fn dimension(&self) -> VectorDimension;
}

/// Shape of the vectors a collection stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorLayout {
    Text,
    TextImage,
}

/// One item to embed. At least one modality must be present.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedInput<'a> {
    pub text: Option<&'a str>,
    pub image: Option<&'a Path>,
}

impl<'a> EmbedInput<'a> {
    pub fn new(text: Option<&'a str>, image: Option<&'a Path>) -> Self {
        // Blank text counts as absent.
        let text = text.filter(|t| !t.trim().is_empty());
        Self { text, image }
    }

    pub fn text(text: &'a str) -> Self {
        Self::new(Some(text), None)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none()
    }
}

/// Default number of inputs sent to a model per call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Text + optional image embedder with fixed output widths.
#[derive(Clone)]
pub struct MultimodalEmbedder {
    text: Arc<dyn EmbeddingGenerator>,
    image: Option<Arc<dyn ImageEmbeddingGenerator>>,
    batch_size: usize,
}

impl std::fmt::Debug for MultimodalEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultimodalEmbedder")
            .field("text_dimension", &self.text.dimension().get())
            .field(
                "image_dimension",
                &self.image.as_ref().map(|g| g.dimension().get()),
            )
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl MultimodalEmbedder {
    pub fn new(text: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            text,
            image: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_image(mut self, image: Arc<dyn ImageEmbeddingGenerator>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn text_dimension(&self) -> usize {
        self.text.dimension().get()
    }

    pub fn image_dimension(&self) -> Option<usize> {
        self.image.as_ref().map(|g| g.dimension().get())
    }

    pub fn supports(&self, layout: VectorLayout) -> bool {
        match layout {
            VectorLayout::Text => true,
            VectorLayout::TextImage => self.image.is_some(),
        }
    }

    /// Output width for a layout.
    pub fn dimension(&self, layout: VectorLayout) -> Result<VectorDimension, VectorError> {
        match layout {
            VectorLayout::Text => Ok(self.text.dimension()),
            VectorLayout::TextImage => {
                let image = self.image_dimension().ok_or_else(|| {
                    VectorError::InvalidInput("no image model configured".to_string())
                })?;
                VectorDimension::new(self.text_dimension() + image)
            }
        }
    }

    /// Embed a single text and/or image.
    pub fn embed(
        &self,
        text: Option<&str>,
        image: Option<&Path>,
        layout: VectorLayout,
    ) -> Result<Vec<f32>, VectorError> {
        let input = EmbedInput::new(text, image);
        let mut vectors = self.embed_inputs(&[input], layout)?;
        vectors.pop().ok_or(VectorError::BatchMismatch {
            sent: 1,
            received: 0,
        })
    }

    /// Embed texts in order with the `Text` layout. Fails as a whole.
    pub fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let inputs: Vec<EmbedInput<'_>> = texts.iter().map(|t| EmbedInput::text(t)).collect();
        self.embed_inputs(&inputs, VectorLayout::Text)
    }

    /// Embed a batch of multimodal inputs. Fails as a whole.
    pub fn embed_inputs(
        &self,
        inputs: &[EmbedInput<'_>],
        layout: VectorLayout,
    ) -> Result<Vec<Vec<f32>>, VectorError> {
        if let Some(pos) = inputs.iter().position(EmbedInput::is_empty) {
            return Err(VectorError::InvalidInput(format!(
                "input {pos} has neither text nor image"
            )));
        }

        let text_dim = self.text_dimension();

        match layout {
            VectorLayout::Text => {
                if let Some(pos) = inputs.iter().position(|i| i.text.is_none()) {
                    return Err(VectorError::InvalidInput(format!(
                        "input {pos} has no text; the text layout cannot carry images"
                    )));
                }
                let texts: Vec<&str> = inputs.iter().filter_map(|i| i.text).collect();
                self.encode_texts(&texts)
            }
            VectorLayout::TextImage => {
                let image_generator = self.image.as_ref().ok_or_else(|| {
                    VectorError::InvalidInput("no image model configured".to_string())
                })?;
                let image_dim = image_generator.dimension().get();

                let texts: Vec<&str> = inputs.iter().filter_map(|i| i.text).collect();
                let images: Vec<&Path> = inputs.iter().filter_map(|i| i.image).collect();

                let mut text_vectors = self.encode_texts(&texts)?.into_iter();
                let mut image_vectors = self.encode_images(image_generator.as_ref(), &images)?.into_iter();

                let mut out = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let mut combined = Vec::with_capacity(text_dim + image_dim);
                    match input.text {
                        Some(_) => combined.extend(next_vector(&mut text_vectors, texts.len())?),
                        None => combined.extend(std::iter::repeat_n(0.0, text_dim)),
                    }
                    match input.image {
                        Some(_) => combined.extend(next_vector(&mut image_vectors, images.len())?),
                        None => combined.extend(std::iter::repeat_n(0.0, image_dim)),
                    }
                    out.push(combined);
                }
                Ok(out)
            }
        }
    }

    fn encode_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        let expected = self.text_dimension();
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let vectors = self.text.generate_embeddings(batch)?;
            out.extend(validate_batch(vectors, batch.len(), expected)?);
        }

        Ok(out)
    }

    fn encode_images(
        &self,
        generator: &dyn ImageEmbeddingGenerator,
        images: &[&Path],
    ) -> Result<Vec<Vec<f32>>, VectorError> {
        let expected = generator.dimension().get();
        let mut out = Vec::with_capacity(images.len());

        for batch in images.chunks(self.batch_size) {
            let vectors = generator.generate_image_embeddings(batch)?;
            out.extend(validate_batch(vectors, batch.len(), expected)?);
        }

        Ok(out)
    }
}

/// Check count and width of a model batch, then normalize every vector.
fn validate_batch(
    mut vectors: Vec<Vec<f32>>,
    sent: usize,
    expected: usize,
) -> Result<Vec<Vec<f32>>, VectorError> {
    if vectors.len() != sent {
        return Err(VectorError::BatchMismatch {
            sent,
            received: vectors.len(),
        });
    }
    for vector in &mut vectors {
        if vector.len() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        l2_normalize(vector)?;
    }
    Ok(vectors)
}

fn next_vector(
    iter: &mut impl Iterator<Item = Vec<f32>>,
    sent: usize,
) -> Result<Vec<f32>, VectorError> {
    iter.next().ok_or(VectorError::BatchMismatch {
        sent,
        received: sent.saturating_sub(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Unnormalized vectors so the embedder's own normalization is visible.
    struct ScaledText {
        dim: usize,
        calls: AtomicUsize,
    }

    impl EmbeddingGenerator for ScaledText {
        fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts
                .iter()
                .map(|t| {
                    if t.contains("boom") {
                        return Err(VectorError::EmbeddingFailed("boom".to_string()));
                    }
                    let mut v = vec![1.0; self.dim];
                    v[0] = t.len() as f32 * 3.0;
                    Ok(v)
                })
                .collect()
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(self.dim).unwrap()
        }
    }

    struct ScaledImage;

    impl ImageEmbeddingGenerator for ScaledImage {
        fn generate_image_embeddings(&self, images: &[&Path]) -> Result<Vec<Vec<f32>>, VectorError> {
            Ok(images.iter().map(|_| vec![2.0, 2.0, 2.0]).collect())
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(3).unwrap()
        }
    }

    fn embedder() -> MultimodalEmbedder {
        MultimodalEmbedder::new(Arc::new(ScaledText {
            dim: 4,
            calls: AtomicUsize::new(0),
        }))
        .with_image(Arc::new(ScaledImage))
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_requires_some_modality() {
        let e = embedder();
        assert!(matches!(
            e.embed(None, None, VectorLayout::Text),
            Err(VectorError::InvalidInput(_))
        ));
        assert!(matches!(
            e.embed(Some("   "), None, VectorLayout::TextImage),
            Err(VectorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_text_is_normalized() {
        let v = embedder()
            .embed(Some("hello"), None, VectorLayout::Text)
            .unwrap();
        assert_eq!(v.len(), 4);
        assert!((norm(&v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_fallback_slices() {
        let e = embedder();
        let image = Path::new("scan.png");

        let text_only = e.embed(Some("hello"), None, VectorLayout::TextImage).unwrap();
        assert_eq!(text_only.len(), 7);
        assert!((norm(&text_only[..4]) - 1.0).abs() < 1e-5);
        assert!(text_only[4..].iter().all(|x| *x == 0.0));

        let image_only = e.embed(None, Some(image), VectorLayout::TextImage).unwrap();
        assert!(image_only[..4].iter().all(|x| *x == 0.0));
        assert!((norm(&image_only[4..]) - 1.0).abs() < 1e-5);

        let both = e
            .embed(Some("hello"), Some(image), VectorLayout::TextImage)
            .unwrap();
        assert!((norm(&both[..4]) - 1.0).abs() < 1e-5);
        assert!((norm(&both[4..]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_text_layout_rejects_image_only() {
        let e = embedder();
        assert!(e
            .embed(None, Some(Path::new("scan.png")), VectorLayout::Text)
            .is_err());
    }

    #[test]
    fn test_text_image_needs_image_model() {
        let e = MultimodalEmbedder::new(Arc::new(ScaledText {
            dim: 4,
            calls: AtomicUsize::new(0),
        }));
        assert!(!e.supports(VectorLayout::TextImage));
        assert!(e.dimension(VectorLayout::TextImage).is_err());
        assert_eq!(e.dimension(VectorLayout::Text).unwrap().get(), 4);
    }

    #[test]
    fn test_embed_many_preserves_order_and_batches() {
        let generator = Arc::new(ScaledText {
            dim: 4,
            calls: AtomicUsize::new(0),
        });
        let e = MultimodalEmbedder::new(generator.clone()).with_batch_size(2);

        let texts = ["a", "bbb", "cc", "dddd", "e"];
        let vectors = e.embed_many(&texts).unwrap();

        assert_eq!(vectors.len(), 5);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
        for (text, vector) in texts.iter().zip(&vectors) {
            let single = e.embed(Some(text), None, VectorLayout::Text).unwrap();
            assert_eq!(&single, vector);
        }
    }

    #[test]
    fn test_embed_many_fails_atomically() {
        let e = embedder();
        let result = e.embed_many(&["fine", "boom", "also fine"]);
        assert!(matches!(result, Err(VectorError::EmbeddingFailed(_))));
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        struct Wrong;
        impl EmbeddingGenerator for Wrong {
            fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
                Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
            }
            fn dimension(&self) -> VectorDimension {
                VectorDimension::new(4).unwrap()
            }
        }

        let e = MultimodalEmbedder::new(Arc::new(Wrong));
        assert!(matches!(
            e.embed_many(&["x"]),
            Err(VectorError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }
}
