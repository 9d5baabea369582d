//! Conversion from native backend scores to the unified similarity score.
//!
//! Every adapter declares the [`DistanceMetric`] its engine reports and
//! passes raw values through [`to_similarity`] before building a
//! [`SearchResult`](crate::SearchResult). The result is always in
//! `[0, 1]`, higher meaning more similar.

use serde::{Deserialize, Serialize};

/// The raw score a backend reports for a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity in `[-1, 1]` (Qdrant with `Distance::Cosine`).
    CosineSimilarity,
    /// Cosine distance `1 - cos` in `[0, 2]` (pgvector `<=>`).
    CosineDistance,
    /// Inner product of L2-normalized vectors, equal to cosine similarity.
    InnerProduct,
    /// Euclidean (L2) distance in `[0, inf)`.
    Euclidean,
}

/// Convert a raw backend value into a similarity in `[0, 1]`.
///
/// Negative cosine values clamp to zero: anti-correlated summaries are
/// treated as irrelevant rather than "less than irrelevant". Non-finite
/// input maps to zero.
pub fn to_similarity(metric: DistanceMetric, raw: f32) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    let similarity = match metric {
        DistanceMetric::CosineSimilarity | DistanceMetric::InnerProduct => raw,
        DistanceMetric::CosineDistance => 1.0 - raw,
        DistanceMetric::Euclidean => 1.0 / (1.0 + raw.max(0.0)),
    };
    similarity.clamp(0.0, 1.0)
}

/// Cosine similarity of two vectors. Returns 0.0 if either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Dot product of two equal-length vectors.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_is_inverted() {
        assert!((to_similarity(DistanceMetric::CosineDistance, 0.0) - 1.0).abs() < f32::EPSILON);
        assert!((to_similarity(DistanceMetric::CosineDistance, 0.25) - 0.75).abs() < 1e-6);
        assert_eq!(to_similarity(DistanceMetric::CosineDistance, 1.5), 0.0);
    }

    #[test]
    fn bounded_scores_pass_through_clamped() {
        assert!((to_similarity(DistanceMetric::CosineSimilarity, 0.42) - 0.42).abs() < 1e-6);
        assert_eq!(to_similarity(DistanceMetric::InnerProduct, -0.3), 0.0);
        assert_eq!(to_similarity(DistanceMetric::InnerProduct, 1.000_001), 1.0);
    }

    #[test]
    fn euclidean_decays_with_distance() {
        assert_eq!(to_similarity(DistanceMetric::Euclidean, 0.0), 1.0);
        assert!((to_similarity(DistanceMetric::Euclidean, 1.0) - 0.5).abs() < 1e-6);
        assert!(
            to_similarity(DistanceMetric::Euclidean, 3.0)
                < to_similarity(DistanceMetric::Euclidean, 2.0)
        );
    }

    #[test]
    fn non_finite_is_zero() {
        assert_eq!(to_similarity(DistanceMetric::CosineSimilarity, f32::NAN), 0.0);
        assert_eq!(to_similarity(DistanceMetric::Euclidean, f32::INFINITY), 0.0);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
