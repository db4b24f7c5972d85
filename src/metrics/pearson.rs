//! Pearson correlation.
//!
//! Vectors are centered and L2-normalized once, after which the Pearson
//! correlation of two aggregated sides reduces to the cosine of the angle
//! between the aggregate vectors. Cluster bounds bracket every pairwise
//! angle and compose them through the quotient formula, with a case
//! distinction on the numerator sign.

use std::f64::consts::PI;

use super::{pair_locations, BoundContext, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath;

#[derive(Debug, Default, Clone, Copy)]
pub struct PearsonCorrelation;

impl SimilarityMetric for PearsonCorrelation {
    fn kind(&self) -> MetricKind {
        MetricKind::Pearson
    }

    fn empirically_bounded(&self) -> bool {
        true
    }

    fn preprocess(&self, vector: &[f64]) -> Vec<f64> {
        vecmath::l2_normalize(&vecmath::center(vector))
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        vecmath::angle(a, b)
    }

    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        vecmath::angle(x, y).cos()
    }

    fn sim_to_dist(&self, sim: f64) -> f64 {
        sim.clamp(-1.0, 1.0).acos()
    }

    fn dist_to_sim(&self, dist: f64) -> f64 {
        dist.cos()
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

/// Upper/lower bound composition for angle-based correlation metrics.
///
/// The numerator collects cross-side pair similarities (distances push the
/// correlation down); each denominator collects within-side similarities
/// (larger dot products inflate the aggregate norms and push it up).
pub(crate) fn angular_combination_bounds(
    metric: &dyn SimilarityMetric,
    cc: &mut ClusterCombination,
    ctx: &BoundContext,
) -> ClusterBounds {
    let lhs = cc.lhs().to_vec();
    let rhs = cc.rhs().to_vec();
    let l_size = lhs.len();
    let r_size = rhs.len();

    let mut max_lower_subset = -1.0_f64;
    let mut numerator_lower = 0.0;
    let mut numerator_upper = 0.0;

    for (i, &l) in lhs.iter().enumerate() {
        for (j, &r) in rhs.iter().enumerate() {
            let c1 = ctx.index.cluster(l);
            let c2 = ctx.index.cluster(r);
            let pair = ctx.cluster_pair(metric, c1, c2);

            let sim_lower = metric.dist_to_sim(pair.dist_upper.min(PI));
            let sim_upper = metric.dist_to_sim(pair.dist_lower);
            numerator_lower += sim_lower;
            numerator_upper += sim_upper;
            // Cross-side pairs are the size-reduced sub-patterns the
            // min-jump and irreducibility policies compare against.
            max_lower_subset = max_lower_subset.max(sim_lower);

            let locations = pair_locations(&pair, c1.id, i, l_size + j);
            cc.add_factor(EmpiricalBoundFactor::new(pair, false, locations));
        }
    }

    let mut denom = [
        // (lower, upper) per side, seeded with the p unit self-dots
        (l_size as f64, l_size as f64),
        (r_size as f64, r_size as f64),
    ];
    for (side_idx, (side, offset)) in [(&lhs, 0), (&rhs, l_size)].into_iter().enumerate() {
        for i in 0..side.len() {
            for j in i + 1..side.len() {
                let c1 = ctx.index.cluster(side[i]);
                let c2 = ctx.index.cluster(side[j]);
                let pair = ctx.cluster_pair(metric, c1, c2);

                let sim_lower = metric.dist_to_sim(pair.dist_upper.min(PI));
                let sim_upper = metric.dist_to_sim(pair.dist_lower);
                denom[side_idx].0 += 2.0 * sim_lower;
                denom[side_idx].1 += 2.0 * sim_upper;

                let locations = pair_locations(&pair, c1.id, offset + i, offset + j);
                cc.add_factor(EmpiricalBoundFactor::new(pair, true, locations));
            }
        }
    }

    // Variance is positive definite; guard against loose bounds driving a
    // denominator to zero.
    let denominator_lower = (denom[0].0.max(1e-7) * denom[1].0.max(1e-7)).sqrt();
    let denominator_upper = (denom[0].1.max(1e-7) * denom[1].1.max(1e-7)).sqrt();

    let (lower, upper) = if numerator_lower >= 0.0 {
        (
            numerator_lower / denominator_upper,
            numerator_upper / denominator_lower,
        )
    } else if numerator_upper >= 0.0 {
        (
            numerator_lower / denominator_lower,
            numerator_upper / denominator_lower,
        )
    } else {
        (
            numerator_lower / denominator_lower,
            numerator_upper / denominator_upper,
        )
    };

    ClusterBounds::new(
        metric.clamp_similarity(lower),
        metric.clamp_similarity(upper),
        max_lower_subset,
    )
}

/// Recompose the upper bound from recorded ingredients at their current
/// ranks. Positive-impact factors are re-attributed to the two denominators
/// in registration order: within-left pairs first, then within-right.
pub(crate) fn angular_empirical_similarity(
    metric: &dyn SimilarityMetric,
    factors: &[EmpiricalBoundFactor],
    p_left: usize,
    p_right: usize,
    ctx: &BoundContext,
) -> f64 {
    let n_within_left = p_left * (p_left - 1) / 2;
    let mut numerator = 0.0;
    let mut denom_left = p_left as f64;
    let mut denom_right = p_right as f64;
    let mut positive_seen = 0;

    for f in factors {
        let sim = metric.dist_to_sim(f.extrema_value(|i, j| metric.pair_value(ctx, i, j)));
        if f.positive_impact() {
            if positive_seen < n_within_left {
                denom_left += 2.0 * sim;
            } else {
                denom_right += 2.0 * sim;
            }
            positive_seen += 1;
        } else {
            numerator += sim;
        }
    }

    numerator / (denom_left.sqrt() * denom_right.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{ClusterIndex, IndexParams};
    use crate::metrics::{bound_combination, BoundCache};
    use crate::stats::StatBag;
    use smallvec::smallvec;

    fn naive_pearson(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len() as f64;
        let (ma, mb) = (a.iter().sum::<f64>() / n, b.iter().sum::<f64>() / n);
        let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
        let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();
        cov / (va.sqrt() * vb.sqrt())
    }

    fn raw_data(n: usize, d: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                (0..d)
                    .map(|k| ((i * 7 + k * 3) as f64 * 0.37).sin() + 0.1 * k as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn similarity_matches_naive_pearson_for_pairs() {
        let metric = PearsonCorrelation;
        let raw = raw_data(6, 24);
        for i in 0..6 {
            for j in 0..6 {
                let x = metric.preprocess(&raw[i]);
                let y = metric.preprocess(&raw[j]);
                let got = metric.similarity(&x, &y);
                let expected = naive_pearson(&raw[i], &raw[j]);
                assert!(
                    (got - expected).abs() < 1e-9,
                    "({i},{j}): {got} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn singleton_combination_bound_has_zero_width() {
        let metric = PearsonCorrelation;
        let raw = raw_data(10, 16);
        let data: Vec<Vec<f64>> = raw.iter().map(|v| metric.preprocess(v)).collect();
        let distances = metric.compute_pairwise_distances(&data, false);
        let params = IndexParams {
            branching_factor: 3,
            max_levels: 8,
            retries: 3,
            start_epsilon: metric.sim_to_dist(0.81),
            epsilon_multiplier: 0.8,
            break_first_levels: 0,
            geo_centroid: false,
            parallel: false,
            seed: 5,
        };
        let index = ClusterIndex::build(&data, &distances, &|a, b| metric.distance(a, b), &params);
        let cache = BoundCache::new();
        let stats = StatBag::new();
        let ctx = BoundContext {
            index: &index,
            data: &data,
            distances: &distances,
            cache: &cache,
            stats: &stats,
            empirical: true,
            discounting: false,
            retained_extrema: 0,
        };

        let mut cc = ClusterCombination::new(
            smallvec![index.singleton(0).id],
            smallvec![index.singleton(4).id, index.singleton(2).id],
            0,
            1,
            false,
        );
        let bounds = bound_combination(&metric, &mut cc, &ctx);
        assert!(bounds.width() < 1e-9);

        let x = data[0].clone();
        let agg = vecmath::add(&data[4], &data[2]);
        let exact = metric.similarity(&x, &agg);
        assert!((bounds.lower - exact).abs() < 1e-9);
    }
}
