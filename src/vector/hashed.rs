//! Offline text generator based on hashed token frequencies.
//!
//! Terms are hashed into fixed buckets with FNV-1a and weighted by frequency.
//! Texts sharing vocabulary land close together. No model download is
//! needed, which makes it the generator of choice for tests and air-gapped
//! setups.

use std::collections::HashMap;
use std::path::Path;

use super::embedder::{EmbeddingGenerator, ImageEmbeddingGenerator};
use super::types::{VectorDimension, VectorError};

/// Name selecting this generator in `embedding.model`.
pub const HASHED_MODEL: &str = "hashed";

#[derive(Debug, Clone, Copy)]
pub struct HashedTokenGenerator {
    dimension: VectorDimension,
}

impl HashedTokenGenerator {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn bucket(term: &str, buckets: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % buckets as u64) as usize
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimension.get();
        let mut tokens = Self::tokenize(text);
        if tokens.is_empty() {
            // Punctuation-only input still gets a stable, non-zero vector.
            tokens.push(text.trim().to_string());
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_default() += 1.0;
        }

        let total = tokens.len() as f32;
        let mut v = vec![0.0f32; buckets];
        for (term, count) in tf {
            // Longer terms carry more signal than short function words.
            let weight = 1.0 + (term.chars().count() as f32).ln();
            v[Self::bucket(term, buckets)] += count / total * weight;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingGenerator for HashedTokenGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Image counterpart: hashes 4-byte shingles of the file contents.
///
/// Identical files map to identical vectors; otherwise there is no visual
/// meaning in the result.
#[derive(Debug, Clone, Copy)]
pub struct HashedImageGenerator {
    dimension: VectorDimension,
}

impl HashedImageGenerator {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }

    fn vector(&self, path: &Path) -> Result<Vec<f32>, VectorError> {
        let bytes = std::fs::read(path)
            .map_err(|e| VectorError::EmbeddingFailed(format!("{}: {e}", path.display())))?;
        let buckets = self.dimension.get() as u64;
        let mut v = vec![0.0f32; self.dimension.get()];

        let shingles: Vec<&[u8]> = if bytes.len() < 4 {
            vec![&bytes[..]]
        } else {
            bytes.windows(4).collect()
        };

        for shingle in shingles {
            let mut h: u64 = 0xcbf29ce484222325;
            for b in shingle {
                h ^= *b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % buckets) as usize] += 1.0;
        }
        Ok(v)
    }
}

impl ImageEmbeddingGenerator for HashedImageGenerator {
    fn generate_image_embeddings(&self, images: &[&Path]) -> Result<Vec<Vec<f32>>, VectorError> {
        images.iter().map(|p| self.vector(p)).collect()
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
