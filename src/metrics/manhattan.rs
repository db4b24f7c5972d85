//! Manhattan distance similarity `1 / (1 + d)`.
//!
//! The only metric without empirical bounds: L1 geometry has no cached
//! extrema formulation here, so combinations are bounded through the generic
//! aggregated centroid-radius path.

use super::{default_theoretical_bounds, BoundContext, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath;

#[derive(Debug, Default, Clone, Copy)]
pub struct ManhattanSimilarity;

impl SimilarityMetric for ManhattanSimilarity {
    fn kind(&self) -> MetricKind {
        MetricKind::Manhattan
    }

    fn min_similarity(&self) -> f64 {
        0.0
    }

    fn empirically_bounded(&self) -> bool {
        false
    }

    fn preprocess(&self, vector: &[f64]) -> Vec<f64> {
        vector.to_vec()
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        vecmath::manhattan(a, b)
    }

    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        1.0 / (1.0 + vecmath::manhattan(x, y))
    }

    fn sim_to_dist(&self, sim: f64) -> f64 {
        1.0 / sim - 1.0
    }

    fn dist_to_sim(&self, dist: f64) -> f64 {
        1.0 / (1.0 + dist)
    }

    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds {
        default_theoretical_bounds(self, cc, ctx)
    }

    fn empirical_similarity(
        &self,
        _factors: &[EmpiricalBoundFactor],
        _p_left: usize,
        _p_right: usize,
        _ctx: &BoundContext,
    ) -> f64 {
        // Configuration validation rejects discounting for this metric, so
        // reaching this is a bound-soundness bug.
        panic!("empirical bounds are not available for manhattan similarity");
    }
}
