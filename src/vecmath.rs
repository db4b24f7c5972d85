//! Shared vector math for dense `f64` vectors.
//!
//! Similarity metrics differ in which distance they cluster under (angular
//! for the correlation family, L1/L2 for the distance similarities), but they
//! all build on the same handful of primitives collected here.

use rayon::prelude::*;

/// Dot product.
#[inline]
#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm.
#[inline]
#[must_use]
pub fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Euclidean (L2) distance.
#[inline]
#[must_use]
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Manhattan (L1) distance.
#[inline]
#[must_use]
pub fn manhattan(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Angle between two vectors, in `[0, pi]`.
///
/// Degenerate (near-zero) vectors get `pi / 2` instead of NaN.
#[inline]
#[must_use]
pub fn angle(a: &[f64], b: &[f64]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom < 1e-24 {
        return std::f64::consts::FRAC_PI_2;
    }
    (dot(a, b) / denom).clamp(-1.0, 1.0).acos()
}

/// Normalize a vector to unit L2 norm.
///
/// Near-zero vectors are returned as all-zeros rather than propagating NaN.
#[must_use]
pub fn l2_normalize(v: &[f64]) -> Vec<f64> {
    let n = norm(v);
    if n < 1e-12 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / n).collect()
}

/// Subtract the mean from every component.
#[must_use]
pub fn center(v: &[f64]) -> Vec<f64> {
    let mean = v.iter().sum::<f64>() / v.len() as f64;
    v.iter().map(|x| x - mean).collect()
}

/// Element-wise sum of a set of vectors.
#[must_use]
pub fn aggregate(vectors: &[&[f64]]) -> Vec<f64> {
    let mut out = vec![0.0; vectors[0].len()];
    for v in vectors {
        for (o, x) in out.iter_mut().zip(v.iter()) {
            *o += x;
        }
    }
    out
}

/// Element-wise addition of two vectors.
#[must_use]
pub fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

/// Average rank of each element (ties get the mean of their rank range).
#[must_use]
pub fn rank(v: &[f64]) -> Vec<f64> {
    let n = v.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| v[i].total_cmp(&v[j]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && v[order[j + 1]] == v[order[i]] {
            j += 1;
        }
        // 1-based mean rank over the tie range [i, j]
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = mean_rank;
        }
        i = j + 1;
    }
    ranks
}

/// Dense symmetric matrix of pairwise values, flat row-major storage.
#[derive(Debug, Clone)]
pub struct PairwiseMatrix {
    n: usize,
    values: Vec<f64>,
}

impl PairwiseMatrix {
    /// Allocate an `n x n` zero matrix.
    #[must_use]
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            values: vec![0.0; n * n],
        }
    }

    /// Fill all pairs `(i, j)` with `f(i, j)`, exploiting symmetry.
    ///
    /// The diagonal is filled with `f(i, i)`.
    pub fn build<F>(n: usize, parallel: bool, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        let mut m = Self::zeros(n);
        if parallel {
            // Each row slice is written by exactly one task.
            m.values
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, row)| {
                    for (j, cell) in row.iter_mut().enumerate() {
                        *cell = if j >= i { f(i, j) } else { 0.0 };
                    }
                });
            for i in 0..n {
                for j in 0..i {
                    m.values[i * n + j] = m.values[j * n + i];
                }
            }
        } else {
            for i in 0..n {
                for j in i..n {
                    let v = f(i, j);
                    m.values[i * n + j] = v;
                    m.values[j * n + i] = v;
                }
            }
        }
        m
    }

    #[inline]
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.values[i * self.n + j] = v;
        self.values[j * self.n + i] = v;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_is_zero_for_identical() {
        let a = [1.0, 2.0, 3.0];
        assert!(angle(&a, &a).abs() < 1e-9);
    }

    #[test]
    fn angle_is_pi_for_opposite() {
        let a = [1.0, 0.0];
        let b = [-2.0, 0.0];
        assert!((angle(&a, &b) - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn rank_handles_ties() {
        let r = rank(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(r, vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn pairwise_matrix_is_symmetric() {
        let m = PairwiseMatrix::build(5, false, |i, j| (i * 10 + j) as f64);
        for i in 0..5 {
            for j in i..5 {
                assert_eq!(m.get(i, j), m.get(j, i));
            }
        }
    }

    #[test]
    fn parallel_and_sequential_builds_agree() {
        let f = |i: usize, j: usize| ((i + 1) * (j + 1)) as f64;
        let a = PairwiseMatrix::build(17, false, f);
        let b = PairwiseMatrix::build(17, true, f);
        for i in 0..17 {
            for j in 0..17 {
                assert_eq!(a.get(i, j), b.get(i, j));
            }
        }
    }
}
