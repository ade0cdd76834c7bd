//! Vector arithmetic shared by the embedder and the index store.

use super::types::VectorError;

/// Scale a vector to unit L2 norm in place.
pub fn l2_normalize(vector: &mut [f32]) -> Result<(), VectorError> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(VectorError::ZeroNorm);
    }
    for v in vector.iter_mut() {
        *v /= norm;
    }
    Ok(())
}

/// Calculate cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance: `1 - cos`, in `[0, 2]`. Smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Monotonic display transform of a distance; not a probability.
pub fn display_similarity(distance: f32) -> f32 {
    if distance > 0.0 {
        1.0 / (1.0 + distance)
    } else {
        1.0
    }
}

/// Encode a vector as little-endian f32 bytes for storage.
pub fn to_le_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. `None` if the length is not a multiple of 4.
pub fn from_le_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        assert!(matches!(l2_normalize(&mut zero), Err(VectorError::ZeroNorm)));
    }

    #[test]
    fn test_cosine_distance_bounds() {
        let a = [1.0, 0.0];
        assert!(cosine_distance(&a, &a).abs() < 1e-6);
        assert!((cosine_distance(&a, &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&a, &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_display_similarity() {
        assert_eq!(display_similarity(0.0), 1.0);
        assert_eq!(display_similarity(-0.0001), 1.0);
        assert!((display_similarity(1.0) - 0.5).abs() < 1e-6);
        assert!(display_similarity(0.2) > display_similarity(0.4));
    }

    #[test]
    fn test_byte_encoding() {
        let v = vec![0.25, -1.5, 3.0];
        assert_eq!(from_le_bytes(&to_le_bytes(&v)), Some(v));
        assert_eq!(from_le_bytes(&[0, 1, 2]), None);
    }
}
