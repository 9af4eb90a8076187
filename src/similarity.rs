//! Cosine similarity over embedding vectors.
//!
//! Accumulates in `f64` regardless of the stored element width so long
//! vectors do not lose precision, and refuses to produce a value for
//! degenerate inputs (length mismatch, empty, or zero-magnitude vectors)
//! instead of returning a misleading 0.0.

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Returns `None` when the vectors differ in length, are empty, or either
/// has (near-)zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }

    Some((dot / denom).clamp(-1.0, 1.0))
}
