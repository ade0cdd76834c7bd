//! Vector dimension and error types.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type-safe wrapper for vector dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct VectorDimension(NonZeroU32);

impl VectorDimension {
    pub fn new(value: usize) -> Result<Self, VectorError> {
        u32::try_from(value)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or(VectorError::InvalidDimension(value))
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.0.get() as usize
    }
}

impl TryFrom<u32> for VectorDimension {
    type Error = VectorError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value as usize)
    }
}

impl From<VectorDimension> for u32 {
    fn from(value: VectorDimension) -> Self {
        value.0.get()
    }
}

/// Errors from embedding generation and vector arithmetic.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Invalid vector dimension: {0}")]
    InvalidDimension(usize),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embedding: {0}")]
    EmbeddingFailed(String),

    #[error("Model returned {received} embeddings for {sent} inputs")]
    BatchMismatch { sent: usize, received: usize },

    #[error("Embedding has zero norm and cannot be normalized")]
    ZeroNorm,

    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_validation() {
        assert!(VectorDimension::new(0).is_err());
        assert_eq!(VectorDimension::new(384).unwrap().get(), 384);
    }

    #[test]
    fn test_dimension_serde() {
        let dim = VectorDimension::new(16).unwrap();
        assert_eq!(serde_json::to_string(&dim).unwrap(), "16");
        assert!(serde_json::from_str::<VectorDimension>("0").is_err());
    }
}
