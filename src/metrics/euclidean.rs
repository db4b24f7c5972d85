//! Euclidean distance similarity `1 / (1 + d)`.
//!
//! Vectors are L2-normalized, so the distance between aggregates decomposes
//! into pairwise dot products and every pairwise dot is the cosine of a
//! cluster-bounded angle. Distances are bracketed in angle space and turned
//! back into chord lengths for the composition.

use std::f64::consts::PI;

use super::{pair_locations, BoundContext, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath;

#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanSimilarity;

impl EuclideanSimilarity {
    fn dist_to_dot(&self, dist: f64) -> f64 {
        dist.cos()
    }

    fn eucl_to_sim(&self, dist: f64) -> f64 {
        1.0 / (1.0 + dist)
    }
}

impl SimilarityMetric for EuclideanSimilarity {
    fn kind(&self) -> MetricKind {
        MetricKind::Euclidean
    }

    fn min_similarity(&self) -> f64 {
        0.0
    }

    fn empirically_bounded(&self) -> bool {
        true
    }

    fn preprocess(&self, vector: &[f64]) -> Vec<f64> {
        vecmath::l2_normalize(vector)
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        vecmath::angle(a, b)
    }

    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        self.eucl_to_sim(vecmath::euclidean(x, y))
    }

    fn sim_to_dist(&self, sim: f64) -> f64 {
        // Chord length back to angle.
        let d = 1.0 / sim - 1.0;
        (1.0 - (d * d) / 2.0).clamp(-1.0, 1.0).acos()
    }

    fn dist_to_sim(&self, dist: f64) -> f64 {
        self.eucl_to_sim((2.0 - 2.0 * dist.cos()).max(0.0).sqrt())
    }

    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds {
        let lhs = cc.lhs().to_vec();
        let rhs = cc.rhs().to_vec();
        let l_size = lhs.len();
        let p = (l_size + rhs.len()) as f64;

        let mut max_lower_subset = self.min_similarity();
        let mut between = (0.0, 0.0);
        let mut within = (0.0, 0.0);

        for (i, &l) in lhs.iter().enumerate() {
            for (j, &r) in rhs.iter().enumerate() {
                let c1 = ctx.index.cluster(l);
                let c2 = ctx.index.cluster(r);
                let pair = ctx.cluster_pair(self, c1, c2);

                let dot0 = self.dist_to_dot(pair.dist_lower);
                let dot1 = self.dist_to_dot(pair.dist_upper.min(PI));
                between.0 += 2.0 * dot0.min(dot1);
                between.1 += 2.0 * dot0.max(dot1);
                max_lower_subset = max_lower_subset.max(self.dist_to_sim(pair.dist_upper));

                let locations = pair_locations(&pair, c1.id, i, l_size + j);
                cc.add_factor(EmpiricalBoundFactor::new(pair, false, locations));
            }
        }

        for (side, offset) in [(&lhs, 0), (&rhs, l_size)] {
            for i in 0..side.len() {
                for j in i + 1..side.len() {
                    let c1 = ctx.index.cluster(side[i]);
                    let c2 = ctx.index.cluster(side[j]);
                    let pair = ctx.cluster_pair(self, c1, c2);

                    let dot0 = self.dist_to_dot(pair.dist_lower);
                    let dot1 = self.dist_to_dot(pair.dist_upper.min(PI));
                    within.0 += 2.0 * dot0.min(dot1);
                    within.1 += 2.0 * dot0.max(dot1);

                    let locations = pair_locations(&pair, c1.id, offset + i, offset + j);
                    cc.add_factor(EmpiricalBoundFactor::new(pair, true, locations));
                }
            }
        }

        let lower_dist = (p - between.1 + within.0).max(0.0).sqrt();
        let upper_dist = (p - between.0 + within.1).max(0.0).sqrt();

        ClusterBounds::new(
            self.clamp_similarity(self.eucl_to_sim(upper_dist)),
            self.clamp_similarity(self.eucl_to_sim(lower_dist)),
            max_lower_subset,
        )
    }

    fn empirical_similarity(
        &self,
        factors: &[EmpiricalBoundFactor],
        p_left: usize,
        p_right: usize,
        ctx: &BoundContext,
    ) -> f64 {
        let mut between = 0.0;
        let mut within = 0.0;
        for f in factors {
            let dot = self.dist_to_dot(f.extrema_value(|i, j| self.pair_value(ctx, i, j)));
            if f.positive_impact() {
                within += 2.0 * dot;
            } else {
                between += 2.0 * dot;
            }
        }
        let p = (p_left + p_right) as f64;
        self.eucl_to_sim((p - between + within).max(0.0).sqrt())
    }
}
