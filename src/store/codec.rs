//! Embedding BLOB codec and vector math.
//!
//! Vectors are stored as consecutive little-endian `f32` values, so a
//! `d`-dimensional vector occupies exactly `d × 4` bytes.

use crate::error::{Error, Result};

/// Encode a float vector as a little-endian byte BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form a
/// whole `f32` are ignored; use [`decode_checked`] when the width matters.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Decode a BLOB that must hold exactly `dims` values.
pub fn decode_checked(blob: &[u8], dims: usize) -> Result<Vec<f32>> {
    if blob.len() != dims * 4 {
        return Err(Error::DimensionMismatch {
            expected: dims,
            actual: blob.len() / 4,
        });
    }
    Ok(blob_to_vec(blob))
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_is_four_bytes_per_value_little_endian() {
        let blob = vec_to_blob(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(blob_to_vec(&blob), vec![1.0, -2.5]);
    }

    #[test]
    fn decode_checked_rejects_wrong_width() {
        let blob = vec_to_blob(&[0.1, 0.2, 0.3]);
        assert!(decode_checked(&blob, 3).is_ok());
        assert!(matches!(
            decode_checked(&blob, 4),
            Err(Error::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
