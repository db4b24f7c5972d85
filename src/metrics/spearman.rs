//! Spearman rank correlation.
//!
//! Pearson correlation over rank-transformed vectors. Everything except the
//! preprocessing delegates to the Pearson machinery.

use super::pearson::{angular_combination_bounds, angular_empirical_similarity};
use super::{BoundContext, PearsonCorrelation, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath;

#[derive(Debug, Default, Clone, Copy)]
pub struct SpearmanCorrelation {
    inner: PearsonCorrelation,
}

impl SimilarityMetric for SpearmanCorrelation {
    fn kind(&self) -> MetricKind {
        MetricKind::Spearman
    }

    fn empirically_bounded(&self) -> bool {
        true
    }

    fn preprocess(&self, vector: &[f64]) -> Vec<f64> {
        vecmath::l2_normalize(&vecmath::center(&vecmath::rank(vector)))
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        self.inner.distance(a, b)
    }

    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        self.inner.similarity(x, y)
    }

    fn sim_to_dist(&self, sim: f64) -> f64 {
        self.inner.sim_to_dist(sim)
    }

    fn dist_to_sim(&self, dist: f64) -> f64 {
        self.inner.dist_to_sim(dist)
    }

    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds {
        angular_combination_bounds(self, cc, ctx)
    }

    fn empirical_similarity(
        &self,
        factors: &[EmpiricalBoundFactor],
        p_left: usize,
        p_right: usize,
        ctx: &BoundContext,
    ) -> f64 {
        angular_empirical_similarity(self, factors, p_left, p_right, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_transform_gives_perfect_rank_correlation() {
        let metric = SpearmanCorrelation::default();
        let a: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..32).map(|i| (i as f64).exp()).collect();
        let x = metric.preprocess(&a);
        let y = metric.preprocess(&b);
        assert!((metric.similarity(&x, &y) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_order_gives_negative_rank_correlation() {
        let metric = SpearmanCorrelation::default();
        let a: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..32).map(|i| -(i as f64).powi(3)).collect();
        let x = metric.preprocess(&a);
        let y = metric.preprocess(&b);
        assert!((metric.similarity(&x, &y) + 1.0).abs() < 1e-9);
    }
}
