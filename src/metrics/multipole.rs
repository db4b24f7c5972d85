//! Multipole similarity.
//!
//! One-sided: a pattern is a set of vectors, and its similarity is
//! `1 - lambda_min` of the set's correlation matrix, the strength of the
//! strongest linear dependence among the set. Cluster bounds bracket every
//! pairwise correlation, take the eigenvalues of the interval midpoint
//! matrix and spread them by the spectral norm of the interval width
//! (a Weyl perturbation argument).

use std::f64::consts::PI;

use super::{pair_locations, BoundContext, SimilarityMetric};
use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor};
use crate::config::MetricKind;
use crate::vecmath;

#[derive(Debug, Default, Clone, Copy)]
pub struct Multipole;

impl SimilarityMetric for Multipole {
    fn kind(&self) -> MetricKind {
        MetricKind::Multipole
    }

    fn empirically_bounded(&self) -> bool {
        true
    }

    fn two_sided(&self) -> bool {
        false
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

    fn combination_similarity(&self, xs: &[&[f64]], _ys: &[&[f64]]) -> f64 {
        let p = xs.len();
        let mut corr = vec![vec![0.0; p]; p];
        for i in 0..p {
            corr[i][i] = 1.0;
            for j in i + 1..p {
                let c = vecmath::angle(xs[i], xs[j]).cos();
                corr[i][j] = c;
                corr[j][i] = c;
            }
        }
        1.0 - smallest_eigenvalue(corr).min(1.0)
    }

    fn sim_to_dist(&self, sim: f64) -> f64 {
        sim.clamp(-1.0, 1.0).acos()
    }

    fn dist_to_sim(&self, dist: f64) -> f64 {
        dist.cos()
    }

    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds {
        assert!(
            cc.rhs().is_empty(),
            "multipole bounds require a one-sided combination, got {cc}"
        );
        let lhs = cc.lhs().to_vec();
        let p = lhs.len();

        let mut lower = vec![vec![0.0; p]; p];
        let mut upper = vec![vec![0.0; p]; p];
        let mut highest_abs_lower = -1.0_f64;

        for i in 0..p {
            // One concrete vector is drawn per cluster, so the diagonal is
            // exactly 1.
            lower[i][i] = 1.0;
            upper[i][i] = 1.0;
            for j in i + 1..p {
                let c1 = ctx.index.cluster(lhs[i]);
                let c2 = ctx.index.cluster(lhs[j]);
                let pair = ctx.cluster_pair(self, c1, c2);

                let sim_lower = self.dist_to_sim(pair.dist_upper.min(PI));
                let sim_upper = self.dist_to_sim(pair.dist_lower);
                if sim_lower > 0.0 {
                    highest_abs_lower = highest_abs_lower.max(sim_lower);
                } else if sim_upper < 0.0 {
                    highest_abs_lower = highest_abs_lower.max(sim_upper.abs());
                }
                lower[i][j] = sim_lower;
                lower[j][i] = sim_lower;
                upper[i][j] = sim_upper;
                upper[j][i] = sim_upper;

                let locations = pair_locations(&pair, c1.id, i, j);
                cc.add_factor(EmpiricalBoundFactor::new(pair.clone(), false, locations));
                cc.add_factor(EmpiricalBoundFactor::new(pair, true, locations));
            }
        }

        let (lo, hi) = spectral_bounds(&lower, &upper);
        ClusterBounds::new(
            self.clamp_similarity(lo),
            self.clamp_similarity(hi),
            highest_abs_lower,
        )
    }

    fn empirical_similarity(
        &self,
        factors: &[EmpiricalBoundFactor],
        p_left: usize,
        _p_right: usize,
        ctx: &BoundContext,
    ) -> f64 {
        let n_pairs = p_left * (p_left - 1) / 2;
        let mut lower_sims = Vec::with_capacity(n_pairs);
        let mut upper_sims = Vec::with_capacity(n_pairs);
        for f in factors {
            let sim = self.dist_to_sim(f.extrema_value(|i, j| self.pair_value(ctx, i, j)));
            if f.positive_impact() {
                lower_sims.push(sim);
            } else {
                upper_sims.push(sim);
            }
        }
        assert_eq!(
            lower_sims.len(),
            upper_sims.len(),
            "unbalanced multipole bound factors"
        );
        assert_eq!(
            lower_sims.len(),
            n_pairs,
            "multipole bound factors do not match the pair count"
        );

        let mut lower = vec![vec![0.0; p_left]; p_left];
        let mut upper = vec![vec![0.0; p_left]; p_left];
        let mut c = 0;
        for i in 0..p_left {
            lower[i][i] = 1.0;
            upper[i][i] = 1.0;
            for j in i + 1..p_left {
                lower[i][j] = lower_sims[c];
                lower[j][i] = lower_sims[c];
                upper[i][j] = upper_sims[c];
                upper[j][i] = upper_sims[c];
                c += 1;
            }
        }
        spectral_bounds(&lower, &upper).1
    }
}

/// Bounds on `1 - lambda_min` over all matrices between `lower` and `upper`.
fn spectral_bounds(lower: &[Vec<f64>], upper: &[Vec<f64>]) -> (f64, f64) {
    let p = lower.len();
    let mut estimate = vec![vec![0.0; p]; p];
    let mut slack = vec![vec![0.0; p]; p];
    for i in 0..p {
        for j in 0..p {
            estimate[i][j] = (upper[i][j] + lower[i][j]) * 0.5;
            slack[i][j] = upper[i][j] - lower[i][j];
        }
    }

    let smallest = smallest_eigenvalue(estimate).min(1.0);
    let spread = 0.5 * spectral_norm(slack);
    (1.0 - (smallest + spread), 1.0 - (smallest - spread))
}

/// Smallest eigenvalue of a symmetric matrix, cyclic Jacobi sweeps.
/// Pattern sides are tiny (p <= 10), so a handful of sweeps converges.
fn smallest_eigenvalue(m: Vec<Vec<f64>>) -> f64 {
    jacobi_eigenvalues(m)
        .into_iter()
        .fold(f64::MAX, f64::min)
}

/// Spectral norm (largest absolute eigenvalue) of a symmetric matrix.
fn spectral_norm(m: Vec<Vec<f64>>) -> f64 {
    jacobi_eigenvalues(m)
        .into_iter()
        .fold(0.0, |a, e| a.max(e.abs()))
}

fn jacobi_eigenvalues(mut a: Vec<Vec<f64>>) -> Vec<f64> {
    let n = a.len();
    if n == 1 {
        return vec![a[0][0]];
    }

    for _sweep in 0..64 {
        let off: f64 = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-24 {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                if a[p][q].abs() < 1e-18 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (theta * theta + 1.0).sqrt())
                } else {
                    -1.0 / (-theta + (theta * theta + 1.0).sqrt())
                };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                let (app, aqq, apq) = (a[p][p], a[q][q], a[p][q]);
                a[p][p] = c * c * app - 2.0 * s * c * apq + s * s * aqq;
                a[q][q] = s * s * app + 2.0 * s * c * apq + c * c * aqq;
                a[p][q] = 0.0;
                a[q][p] = 0.0;
                for k in 0..n {
                    if k == p || k == q {
                        continue;
                    }
                    let (akp, akq) = (a[k][p], a[k][q]);
                    a[k][p] = c * akp - s * akq;
                    a[p][k] = a[k][p];
                    a[k][q] = s * akp + c * akq;
                    a[q][k] = a[k][q];
                }
            }
        }
    }

    (0..n).map(|i| a[i][i]).collect()
}
