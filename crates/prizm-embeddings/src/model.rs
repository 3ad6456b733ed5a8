//! Vector helpers shared by the Candle encoder and vector consumers.

/// Euclidean norm of a vector.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length. All-zero vectors are returned as is.
pub fn normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&values);
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Cosine similarity of two raw vectors. Returns 0.0 when lengths differ
/// or either vector is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / denom
}
