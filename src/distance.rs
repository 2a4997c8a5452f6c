//! Distance metrics for vector similarity
//!
//! Every metric is expressed as a distance: smaller means closer. Inner
//! product is negated and cosine similarity is converted to `1 - sim`, so a
//! single ascending sort ranks results for all metrics.

use crate::error::{EngineError, Result};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metrics for measuring vector similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean (L2) distance
    Euclidean,
    /// Cosine similarity (converted to distance: 1 - similarity)
    Cosine,
    /// Inner product (negated for minimum distance)
    DotProduct,
}

impl DistanceMetric {
    /// Compute the distance between two vectors using this metric
    pub fn distance(&self, v1: &Vector, v2: &Vector) -> Result<f32> {
        if !v1.has_same_dimension(v2) {
            return Err(EngineError::DimensionMismatch {
                expected: v1.dimension(),
                actual: v2.dimension(),
            });
        }

        match self {
            DistanceMetric::Euclidean => Ok(euclidean_distance(v1, v2)),
            DistanceMetric::Cosine => cosine_distance(v1, v2),
            DistanceMetric::DotProduct => Ok(-dot_product(v1, v2)),
        }
    }

    /// Whether zero-magnitude vectors are meaningless under this metric.
    pub fn rejects_zero_vectors(&self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::DotProduct => "dot",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" | "dotproduct" | "inner_product" | "ip" => Ok(DistanceMetric::DotProduct),
            other => Err(format!("unknown distance metric '{}'", other)),
        }
    }
}

/// Compute Euclidean (L2) distance between two vectors
pub fn euclidean_distance(v1: &Vector, v2: &Vector) -> f32 {
    v1.as_slice()
        .iter()
        .zip(v2.as_slice().iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Compute cosine distance between two vectors (1 - cosine similarity)
pub fn cosine_distance(v1: &Vector, v2: &Vector) -> Result<f32> {
    let norm1 = v1.norm();
    let norm2 = v2.norm();

    if norm1 == 0.0 || norm2 == 0.0 {
        return Err(EngineError::InvalidVector {
            reason: "Cannot compute cosine distance with zero vector".to_string(),
        });
    }

    let similarity = (dot_product(v1, v2) / (norm1 * norm2)).clamp(-1.0, 1.0);
    Ok(1.0 - similarity)
}

/// Compute dot product of two vectors
pub fn dot_product(v1: &Vector, v2: &Vector) -> f32 {
    v1.as_slice()
        .iter()
        .zip(v2.as_slice().iter())
        .map(|(a, b)| a * b)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_euclidean_distance() {
        let v1 = Vector::new(vec![1.0, 2.0, 3.0]);
        let v2 = Vector::new(vec![4.0, 5.0, 6.0]);
        assert_relative_eq!(euclidean_distance(&v1, &v2), 5.196152, epsilon = 1e-5);
    }

    #[test]
    fn test_euclidean_unit_step() {
        let v1 = Vector::new(vec![0.0, 0.0, 0.0]);
        let v2 = Vector::new(vec![1.0, 0.0, 0.0]);
        assert_relative_eq!(euclidean_distance(&v1, &v2), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        let x = Vector::new(vec![1.0, 0.0, 0.0]);
        let y = Vector::new(vec![0.0, 1.0, 0.0]);
        let neg_x = Vector::new(vec![-1.0, 0.0, 0.0]);
        assert_relative_eq!(cosine_distance(&x, &x).unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(&x, &y).unwrap(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cosine_distance(&x, &neg_x).unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let zero = Vector::new(vec![0.0, 0.0]);
        let v = Vector::new(vec![1.0, 0.0]);
        assert!(DistanceMetric::Cosine.distance(&zero, &v).is_err());
    }

    #[test]
    fn test_dot_product_is_negated() {
        let v1 = Vector::new(vec![1.0, 2.0, 3.0]);
        let v2 = Vector::new(vec![4.0, 5.0, 6.0]);
        assert_relative_eq!(dot_product(&v1, &v2), 32.0, epsilon = 1e-6);
        assert_relative_eq!(
            DistanceMetric::DotProduct.distance(&v1, &v2).unwrap(),
            -32.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let v1 = Vector::new(vec![1.0, 2.0]);
        let v2 = Vector::new(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            DistanceMetric::Euclidean.distance(&v1, &v2),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("L2".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert_eq!("cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!("ip".parse::<DistanceMetric>(), Ok(DistanceMetric::DotProduct));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::DotProduct.to_string(), "dot");
    }
}
