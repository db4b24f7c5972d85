//! Total correlation.
//!
//! One-sided, information theoretic: the similarity of a vector set is
//! `sum H(X_i) - H(X_1..X_p)`, how much information the variables share.
//! Vectors are discretized into equi-width bins during preprocessing, and
//! the pairwise "distance" matrix of the empirical bounds is replaced by
//! pairwise joint entropies (single-variable entropies on the diagonal).

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{BoundContext, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath::{self, PairwiseMatrix};

const DEFAULT_BINS: usize = 10;

#[derive(Debug)]
pub struct TotalCorrelation {
    bins: usize,
    entropies: RwLock<Option<PairwiseMatrix>>,
}

impl Default for TotalCorrelation {
    fn default() -> Self {
        Self::with_bins(DEFAULT_BINS)
    }
}

impl TotalCorrelation {
    #[must_use]
    pub fn with_bins(bins: usize) -> Self {
        Self {
            bins,
            entropies: RwLock::new(None),
        }
    }

    /// Map a vector onto `0..bins` equi-width bin indices.
    fn discretize(&self, v: &[f64]) -> Vec<f64> {
        let min = v.iter().copied().fold(f64::MAX, f64::min);
        let max = v.iter().copied().fold(f64::MIN, f64::max);
        let range = max - min;
        if range < 1e-12 {
            return vec![0.0; v.len()];
        }
        v.iter()
            .map(|&x| {
                let b = ((x - min) / range * self.bins as f64).floor();
                b.min(self.bins as f64 - 1.0)
            })
            .collect()
    }

    /// Entropy of one discretized vector, in nats.
    fn entropy(&self, v: &[f64]) -> f64 {
        let mut hist = vec![0u64; self.bins];
        for &x in v {
            hist[x as usize] += 1;
        }
        hist_entropy(hist.iter().copied().filter(|&c| c > 0), v.len())
    }

    /// Joint entropy of two discretized vectors.
    fn joint_entropy2(&self, a: &[f64], b: &[f64]) -> f64 {
        let mut hist = vec![0u64; self.bins * self.bins];
        for (&x, &y) in a.iter().zip(b.iter()) {
            hist[x as usize * self.bins + y as usize] += 1;
        }
        hist_entropy(hist.iter().copied().filter(|&c| c > 0), a.len())
    }

    /// Joint entropy over an arbitrary number of discretized rows.
    fn joint_entropy_rows(&self, rows: &[&[f64]]) -> f64 {
        let m = rows[0].len();
        let mut hist: HashMap<u64, u64> = HashMap::new();
        for j in 0..m {
            let mut key = 1u64;
            for row in rows {
                key = key * self.bins as u64 + row[j] as u64;
            }
            *hist.entry(key).or_insert(0) += 1;
        }
        hist_entropy(hist.into_values(), m)
    }

    fn total_correlation(&self, rows: &[&[f64]]) -> f64 {
        let sum: f64 = rows.iter().map(|r| self.entropy(r)).sum();
        sum - self.joint_entropy_rows(rows)
    }

    /// Greedy upper bound on the joint entropy of the whole set from the
    /// pairwise joint-entropy upper bounds, via a cheapest conditional
    /// entropy forest: every variable is either a root (contributing its
    /// own entropy upper bound) or conditioned on a root-ward neighbor.
    /// `H(X_i | X_j) <= ub(H(X_i, X_j)) - lb(H(X_j))` holds for any pair of
    /// member points, so the forest sum bounds the joint entropy.
    fn joint_entropy_upper(&self, joint_ubs: &[Vec<f64>], single_lbs: &[f64]) -> f64 {
        let p = joint_ubs.len();
        let mut conditional = vec![vec![0.0; p]; p];
        let mut flat: Vec<(usize, usize, f64)> = Vec::with_capacity(p * p);
        for i in 0..p {
            for j in 0..p {
                let ce = if i == j {
                    f64::MAX
                } else {
                    (joint_ubs[i][j] - single_lbs[j]).max(0.0)
                };
                conditional[i][j] = ce;
                flat.push((i, j, ce));
            }
        }
        flat.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut used = vec![false; p];
        let mut n_used = 0;
        let mut total = 0.0;
        for (i, j, _) in flat {
            if n_used == p {
                break;
            }
            if used[i] || used[j] {
                continue;
            }
            used[i] = true;
            n_used += 1;
            total += if i == j {
                joint_ubs[i][i]
            } else {
                conditional[i][j]
            };
        }
        total
    }
}

fn hist_entropy(counts: impl Iterator<Item = u64>, n: usize) -> f64 {
    let n = n as f64;
    let mut out = 0.0;
    for c in counts {
        if c > 0 {
            let p = c as f64 / n;
            out += p * p.ln();
        }
    }
    -out
}

impl SimilarityMetric for TotalCorrelation {
    fn kind(&self) -> MetricKind {
        MetricKind::TotalCorrelation
    }

    fn min_similarity(&self) -> f64 {
        0.0
    }

    fn max_similarity(&self) -> f64 {
        3.0 * (self.bins as f64).log2()
    }

    fn empirically_bounded(&self) -> bool {
        true
    }

    fn two_sided(&self) -> bool {
        false
    }

    fn preprocess(&self, vector: &[f64]) -> Vec<f64> {
        self.discretize(vector)
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        vecmath::euclidean(a, b)
    }

    fn similarity(&self, x: &[f64], y: &[f64]) -> f64 {
        // Mutual information of a pair.
        self.entropy(x) + self.entropy(y) - self.joint_entropy2(x, y)
    }

    fn combination_similarity(&self, xs: &[&[f64]], _ys: &[&[f64]]) -> f64 {
        self.total_correlation(xs)
    }

    // The distance conversions are not meaningful in entropy space; the
    // constants only steer the epsilon schedule and approximation size.
    fn sim_to_dist(&self, _sim: f64) -> f64 {
        100.0
    }

    fn dist_to_sim(&self, _dist: f64) -> f64 {
        1.0
    }

    fn max_approximation_size(&self, _ratio: f64) -> f64 {
        6.0
    }

    fn compute_pairwise_distances(&self, data: &[Vec<f64>], parallel: bool) -> PairwiseMatrix {
        let entropies = PairwiseMatrix::build(data.len(), parallel, |i, j| {
            if i == j {
                self.entropy(&data[i])
            } else {
                self.joint_entropy2(&data[i], &data[j])
            }
        });
        *self.entropies.write() = Some(entropies);

        PairwiseMatrix::build(data.len(), parallel, |i, j| {
            vecmath::euclidean(&data[i], &data[j])
        })
    }

    fn pair_value(&self, _ctx: &BoundContext, i: usize, j: usize) -> f64 {
        self.entropies
            .read()
            .as_ref()
            .expect("pairwise entropies are computed during preprocessing")
            .get(i, j)
    }

    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds {
        assert!(
            cc.rhs().is_empty(),
            "total correlation requires a one-sided combination, got {cc}"
        );
        let lhs = cc.lhs().to_vec();
        let p = lhs.len();

        // Exact at singleton granularity: zero-width interval.
        if cc.is_singleton(ctx.index) {
            let rows: Vec<&[f64]> = lhs
                .iter()
                .map(|&id| ctx.data[ctx.index.cluster(id).vector_id() as usize].as_slice())
                .collect();
            let tc = self.clamp_similarity(self.total_correlation(&rows));
            return ClusterBounds::new(tc, tc, 0.0);
        }

        let mut lower = 0.0;
        let mut upper = 0.0;
        let mut joint_ubs = vec![vec![0.0; p]; p];
        let mut single_lbs = vec![0.0; p];
        let mut max_joint_lower = f64::MIN;
        let mut max_joint_pair = None;

        for i in 0..p {
            for j in i..p {
                if i == j {
                    let single = ctx.single_cluster_extrema(self, ctx.index.cluster(lhs[i]));
                    lower += single.dist_lower;
                    upper += single.dist_upper;
                    joint_ubs[i][i] = single.dist_upper;
                    single_lbs[i] = single.dist_lower;
                    cc.add_factor(EmpiricalBoundFactor::new(single, true, [i, i]));
                } else {
                    let pair = ctx.empirical_pair(
                        self,
                        ctx.index.cluster(lhs[i]),
                        ctx.index.cluster(lhs[j]),
                    );
                    if pair.dist_lower > max_joint_lower {
                        max_joint_lower = pair.dist_lower;
                        max_joint_pair = Some(pair.clone());
                    }
                    joint_ubs[i][j] = pair.dist_upper;
                    joint_ubs[j][i] = pair.dist_upper;
                }
            }
        }

        // The subtracted joint entropy dominates any single pair's, so its
        // lower bound narrows the combination from above.
        if let Some(pair) = max_joint_pair {
            let left_pos = lhs.iter().position(|&id| id == pair.left).unwrap_or(0);
            let right_pos = lhs.iter().position(|&id| id == pair.right).unwrap_or(0);
            cc.add_factor(EmpiricalBoundFactor::new(pair, false, [left_pos, right_pos]));
            upper -= max_joint_lower;
        }
        lower -= self.joint_entropy_upper(&joint_ubs, &single_lbs);

        ClusterBounds::new(
            self.clamp_similarity(lower),
            self.clamp_similarity(upper),
            0.0,
        )
    }

    fn empirical_similarity(
        &self,
        factors: &[EmpiricalBoundFactor],
        _p_left: usize,
        _p_right: usize,
        ctx: &BoundContext,
    ) -> f64 {
        let mut upper = 0.0;
        for f in factors {
            let v = f.extrema_value(|i, j| self.pair_value(ctx, i, j));
            if f.positive_impact() {
                upper += v;
            } else {
                upper -= v;
            }
        }
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discretize_spans_all_bins() {
        let tc = TotalCorrelation::default();
        let v: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let d = tc.discretize(&v);
        assert_eq!(d.iter().copied().fold(f64::MAX, f64::min), 0.0);
        assert_eq!(d.iter().copied().fold(f64::MIN, f64::max), 9.0);
    }

    #[test]
    fn constant_vector_discretizes_to_zero() {
        let tc = TotalCorrelation::default();
        let d = tc.discretize(&[4.2; 16]);
        assert!(d.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn entropy_of_uniform_bins_is_log_n() {
        let tc = TotalCorrelation::default();
        let v: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let d = tc.discretize(&v);
        assert!((tc.entropy(&d) - (10.0_f64).ln()).abs() < 1e-9);
    }

    #[test]
    fn identical_vectors_share_all_information() {
        let tc = TotalCorrelation::default();
        let v: Vec<f64> = (0..60).map(|i| (i as f64 * 0.41).sin()).collect();
        let d = tc.discretize(&v);
        // I(X; X) = H(X)
        assert!((tc.similarity(&d, &d) - tc.entropy(&d)).abs() < 1e-9);
    }

    #[test]
    fn total_correlation_of_copies_adds_up() {
        let tc = TotalCorrelation::default();
        let v: Vec<f64> = (0..60).map(|i| (i as f64 * 0.17).cos()).collect();
        let d = tc.discretize(&v);
        // TC(X, X, X) = 3 H(X) - H(X) = 2 H(X)
        let got = tc.combination_similarity(&[&d, &d, &d], &[]);
        assert!((got - 2.0 * tc.entropy(&d)).abs() < 1e-9);
    }

    #[test]
    fn joint_entropy_chain_bound_is_valid_for_exact_inputs() {
        let tc = TotalCorrelation::default();
        let a = tc.discretize(&(0..50).map(|i| (i as f64 * 0.3).sin()).collect::<Vec<_>>());
        let b = tc.discretize(&(0..50).map(|i| (i as f64 * 0.7).cos()).collect::<Vec<_>>());
        let exact = tc.joint_entropy_rows(&[&a, &b]);
        let joint_ubs = vec![
            vec![tc.entropy(&a), tc.joint_entropy2(&a, &b)],
            vec![tc.joint_entropy2(&a, &b), tc.entropy(&b)],
        ];
        let single_lbs = vec![tc.entropy(&a), tc.entropy(&b)];
        assert!(tc.joint_entropy_upper(&joint_ubs, &single_lbs) >= exact - 1e-9);
    }
}
