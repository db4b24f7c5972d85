//! Similarity metrics and the bound contract.
//!
//! A metric supplies three things to the search: a preprocessing step applied
//! once per vector, an exact similarity for concrete vector groupings, and a
//! *sound* similarity interval for whole cluster combinations. Soundness is
//! the load-bearing property: for every possible assignment of member points
//! to the clusters of a combination, the true similarity must lie inside the
//! returned interval, and the interval must collapse to a point at singleton
//! granularity.
//!
//! Pairwise cluster bounds come in two flavors. Theoretical bounds derive
//! from centroid distance plus/minus the covering radii (triangle
//! inequality); empirical bounds scan the true pairwise extrema among a
//! cluster pair's members once and are cached. The cache is purely additive
//! within a run, so lookups need no synchronization beyond the map's own.

mod euclidean;
mod manhattan;
mod multipole;
mod pearson;
mod spearman;
mod total_correlation;

pub use euclidean::EuclideanSimilarity;
pub use manhattan::ManhattanSimilarity;
pub use multipole::Multipole;
pub use pearson::PearsonCorrelation;
pub use spearman::SpearmanCorrelation;
pub use total_correlation::TotalCorrelation;

use std::sync::Arc;

use dashmap::DashMap;

use crate::bounding::{ClusterBounds, ClusterCombination, EmpiricalBoundFactor, PairExtrema};
use crate::clustering::{Cluster, ClusterId, ClusterIndex};
use crate::config::MetricKind;
use crate::stats::StatBag;
use crate::vecmath::{self, PairwiseMatrix};

/// The pluggable similarity-metric contract.
///
/// Implementations are stateless apart from metric-private preprocessing
/// artifacts; all shared mutable state lives in the [`BoundCache`].
pub trait SimilarityMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    fn min_similarity(&self) -> f64 {
        -1.0
    }

    fn max_similarity(&self) -> f64 {
        1.0
    }

    fn similarity_range(&self) -> f64 {
        self.max_similarity() - self.min_similarity()
    }

    /// Whether empirical (extrema-based) pair bounds are available.
    fn empirically_bounded(&self) -> bool;

    /// One-sided metrics keep the right side empty.
    fn two_sided(&self) -> bool {
        true
    }

    /// Per-vector preprocessing, applied once before indexing.
    fn preprocess(&self, vector: &[f64]) -> Vec<f64>;

    /// The distance the cluster index is built under.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    /// Exact similarity of two aggregated side vectors.
    fn similarity(&self, x: &[f64], y: &[f64]) -> f64;

    /// Exact similarity of a concrete grouping; sides are aggregated by
    /// element-wise summation. One-sided metrics override this.
    fn combination_similarity(&self, xs: &[&[f64]], ys: &[&[f64]]) -> f64 {
        let x = vecmath::aggregate(xs);
        let y = vecmath::aggregate(ys);
        self.similarity(&x, &y)
    }

    fn sim_to_dist(&self, sim: f64) -> f64;

    fn dist_to_sim(&self, dist: f64) -> f64;

    /// Radii scale below which the shrunk upper bound may be applied.
    fn max_approximation_size(&self, ratio: f64) -> f64 {
        self.sim_to_dist(self.min_similarity() + ratio * self.similarity_range())
    }

    /// Pairwise distances between all vectors under [`Self::distance`].
    fn compute_pairwise_distances(&self, data: &[Vec<f64>], parallel: bool) -> PairwiseMatrix {
        PairwiseMatrix::build(data.len(), parallel, |i, j| {
            self.distance(&data[i], &data[j])
        })
    }

    /// The value empirical pair bounds are extrema of. Pairwise distance for
    /// most metrics; total correlation substitutes pairwise joint entropies.
    fn pair_value(&self, ctx: &BoundContext, i: usize, j: usize) -> f64 {
        ctx.distances.get(i, j)
    }

    /// Compute a sound similarity interval for `cc`, recording the bound
    /// ingredients that produced it on the combination.
    fn combination_bounds(&self, cc: &mut ClusterCombination, ctx: &BoundContext) -> ClusterBounds;

    /// Recompose the upper bound directly from recorded ingredients at their
    /// current ranks, without touching cluster geometry.
    fn empirical_similarity(
        &self,
        factors: &[EmpiricalBoundFactor],
        p_left: usize,
        p_right: usize,
        ctx: &BoundContext,
    ) -> f64;

    /// Clamp a bound into the metric's valid similarity range. NaN from
    /// degenerate geometry collapses to the range minimum.
    fn clamp_similarity(&self, s: f64) -> f64 {
        if s.is_nan() {
            return self.min_similarity();
        }
        s.clamp(self.min_similarity(), self.max_similarity())
    }
}

/// Instantiate the metric for a [`MetricKind`].
#[must_use]
pub fn create_metric(kind: MetricKind) -> Box<dyn SimilarityMetric> {
    match kind {
        MetricKind::Pearson => Box::new(PearsonCorrelation),
        MetricKind::Spearman => Box::new(SpearmanCorrelation::default()),
        MetricKind::Euclidean => Box::new(EuclideanSimilarity),
        MetricKind::Manhattan => Box::new(ManhattanSimilarity),
        MetricKind::Multipole => Box::new(Multipole),
        MetricKind::TotalCorrelation => Box::new(TotalCorrelation::default()),
    }
}

/// Memoized cluster-pair geometry, shared by all tasks of a run.
///
/// Purely additive: entries are inserted once and never invalidated.
#[derive(Debug, Default)]
pub struct BoundCache {
    pairs: DashMap<(ClusterId, ClusterId), Arc<PairExtrema>>,
    singles: DashMap<ClusterId, Arc<PairExtrema>>,
    aggregates: DashMap<Vec<ClusterId>, Arc<(Vec<f64>, f64)>>,
}

impl BoundCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached cluster pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}

/// Everything a bound computation needs, bundled to keep signatures flat.
pub struct BoundContext<'a> {
    pub index: &'a ClusterIndex,
    pub data: &'a [Vec<f64>],
    pub distances: &'a PairwiseMatrix,
    pub cache: &'a BoundCache,
    pub stats: &'a StatBag,
    /// Resolved: empirical bounding requested and supported by the metric.
    pub empirical: bool,
    /// Whether extrema lists are retained for discounting.
    pub discounting: bool,
    /// Extrema entries retained per cluster pair.
    pub retained_extrema: usize,
}

impl BoundContext<'_> {
    /// Pairwise cluster bounds in the mode this run operates under.
    pub fn cluster_pair(
        &self,
        metric: &dyn SimilarityMetric,
        c1: &Cluster,
        c2: &Cluster,
    ) -> Arc<PairExtrema> {
        if self.empirical {
            self.empirical_pair(metric, c1, c2)
        } else {
            self.theoretical_pair(metric, c1, c2)
        }
    }

    /// Geometric pair bounds: centroid distance plus/minus both radii.
    pub fn theoretical_pair(
        &self,
        metric: &dyn SimilarityMetric,
        c1: &Cluster,
        c2: &Cluster,
    ) -> Arc<PairExtrema> {
        let (hi, lo) = if c1.id > c2.id { (c1, c2) } else { (c2, c1) };
        let key = (hi.id, lo.id);
        if let Some(hit) = self.cache.pairs.get(&key) {
            return hit.clone();
        }

        let centroid_dist = match (hi.centroid_idx(), lo.centroid_idx()) {
            (Some(a), Some(b)) => self.distances.get(a as usize, b as usize),
            _ => metric.distance(hi.centroid(), lo.centroid()),
        };
        let spread = hi.radius() + lo.radius();
        let entry = Arc::new(PairExtrema {
            left: hi.id,
            right: lo.id,
            dist_lower: (centroid_dist - spread).max(0.0),
            dist_upper: (centroid_dist + spread).max(0.0),
            min_pairs: Vec::new(),
            max_pairs: Vec::new(),
            coverage: hi.size() as u64 * lo.size() as u64,
            is_pair: true,
        });
        self.cache.pairs.entry(key).or_insert(entry).clone()
    }

    /// Empirical pair bounds: the true extrema over the member
    /// cross-product, optionally with the top extrema retained for
    /// discounting. One `O(|A| * |B|)` scan per pair, cached.
    pub fn empirical_pair(
        &self,
        metric: &dyn SimilarityMetric,
        c1: &Cluster,
        c2: &Cluster,
    ) -> Arc<PairExtrema> {
        let (hi, lo) = if c1.id > c2.id { (c1, c2) } else { (c2, c1) };
        let key = (hi.id, lo.id);
        if let Some(hit) = self.cache.pairs.get(&key) {
            return hit.clone();
        }

        let singletons = hi.size() == 1 && lo.size() == 1;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut minima = TopExtrema::smallest(self.extrema_capacity());
        let mut maxima = TopExtrema::largest(self.extrema_capacity());

        for &i in hi.members() {
            for &j in lo.members() {
                // Self-distances are excluded under discounting; the cut
                // materialization would otherwise duplicate the overlap.
                if !singletons && self.discounting && i == j {
                    continue;
                }
                let v = metric.pair_value(self, i as usize, j as usize);
                min = min.min(v);
                max = max.max(v);
                if self.discounting {
                    minima.push(v, [i, j]);
                    maxima.push(v, [i, j]);
                }
            }
        }

        let coverage = hi.size() as u64 * lo.size() as u64;
        self.stats.add(&self.stats.lookups, coverage);

        let entry = Arc::new(PairExtrema {
            left: hi.id,
            right: lo.id,
            dist_lower: min,
            dist_upper: max,
            min_pairs: minima.into_pairs(),
            max_pairs: maxima.into_pairs(),
            coverage,
            is_pair: true,
        });
        self.cache.pairs.entry(key).or_insert(entry).clone()
    }

    /// Per-cluster bounds over the diagonal of the pair-value matrix, used
    /// by total correlation for single-variable entropies.
    pub fn single_cluster_extrema(
        &self,
        metric: &dyn SimilarityMetric,
        c: &Cluster,
    ) -> Arc<PairExtrema> {
        if let Some(hit) = self.cache.singles.get(&c.id) {
            return hit.clone();
        }

        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut minima = TopExtrema::smallest(self.extrema_capacity());
        let mut maxima = TopExtrema::largest(self.extrema_capacity());
        for &i in c.members() {
            let v = metric.pair_value(self, i as usize, i as usize);
            min = min.min(v);
            max = max.max(v);
            if self.discounting {
                minima.push(v, [i, i]);
                maxima.push(v, [i, i]);
            }
        }

        let entry = Arc::new(PairExtrema {
            left: c.id,
            right: c.id,
            dist_lower: min,
            dist_upper: max,
            min_pairs: minima.into_pairs(),
            max_pairs: maxima.into_pairs(),
            coverage: c.size() as u64,
            is_pair: false,
        });
        self.cache.singles.entry(c.id).or_insert(entry).clone()
    }

    /// Summed centroid and radius of a cluster list, memoized for reuse
    /// across sibling combinations.
    pub fn aggregate_geometry(&self, ids: &[ClusterId]) -> Arc<(Vec<f64>, f64)> {
        if ids.len() == 1 {
            let c = self.index.cluster(ids[0]);
            return Arc::new((c.centroid().to_vec(), c.radius()));
        }
        if let Some(hit) = self.cache.aggregates.get(ids) {
            return hit.clone();
        }

        let (rest, last) = ids.split_at(ids.len() - 1);
        let rest_geometry = self.aggregate_geometry(rest);
        let last_cluster = self.index.cluster(last[0]);
        let centroid = vecmath::add(&rest_geometry.0, last_cluster.centroid());
        let radius = rest_geometry.1 + last_cluster.radius();

        let entry = Arc::new((centroid, radius));
        self.cache
            .aggregates
            .entry(ids.to_vec())
            .or_insert(entry)
            .clone()
    }

    fn extrema_capacity(&self) -> usize {
        if self.discounting {
            self.retained_extrema
        } else {
            0
        }
    }

    pub(crate) fn count_candidate(&self, cc: &ClusterCombination) {
        self.stats.increment(&self.stats.candidates);
        self.stats.add(&self.stats.candidate_size, cc.size());
    }
}

/// Bound `cc` through the metric, idempotently.
///
/// A second call on a bounded combination returns the identical interval
/// without recomputation.
pub fn bound_combination(
    metric: &dyn SimilarityMetric,
    cc: &mut ClusterCombination,
    ctx: &BoundContext,
) -> ClusterBounds {
    if cc.is_bounded() {
        return *cc.expect_bounds();
    }
    let bounds = metric.combination_bounds(cc, ctx);
    cc.update_bounds(bounds);
    cc.set_bounded(true);
    *cc.expect_bounds()
}

/// Highest lower bound among all sub-patterns of `cc`, recursively.
pub fn max_subset_similarity(
    metric: &dyn SimilarityMetric,
    cc: &ClusterCombination,
    ctx: &BoundContext,
) -> f64 {
    let mut best = f64::MIN;
    for mut sub in cc.subset_combinations(ctx.index) {
        bound_combination(metric, &mut sub, ctx);
        best = best.max(sub.expect_bounds().lower);
        best = best.max(max_subset_similarity(metric, &sub, ctx));
    }
    best
}

/// Generic theoretical combination bounds from aggregated geometry, used by
/// metrics without a closed-form pair composition (Manhattan).
pub(crate) fn default_theoretical_bounds(
    metric: &dyn SimilarityMetric,
    cc: &ClusterCombination,
    ctx: &BoundContext,
) -> ClusterBounds {
    let lhs = cc.lhs();
    let rhs = cc.rhs();

    let (lower_dist, upper_dist, max_lower_subset) = if cc.cardinality() == 2 {
        let c1 = ctx.index.cluster(lhs[0]);
        let c2 = ctx.index.cluster(if rhs.is_empty() { lhs[1] } else { rhs[0] });
        let pair = ctx.theoretical_pair(metric, c1, c2);
        (pair.dist_lower, pair.dist_upper, metric.min_similarity())
    } else {
        let left = ctx.aggregate_geometry(lhs);
        let right = ctx.aggregate_geometry(rhs);
        let centroid_dist = metric.distance(&left.0, &right.0);
        let spread = left.1 + right.1;

        let mut best = metric.min_similarity();
        for &l in lhs {
            for &r in rhs {
                let pair =
                    ctx.theoretical_pair(metric, ctx.index.cluster(l), ctx.index.cluster(r));
                best = best.max(metric.dist_to_sim(pair.dist_upper));
            }
        }
        (
            (centroid_dist - spread).max(0.0),
            (centroid_dist + spread).max(0.0),
            best,
        )
    };

    let lower = metric.clamp_similarity(metric.dist_to_sim(upper_dist));
    let upper = metric.clamp_similarity(metric.dist_to_sim(lower_dist));
    ClusterBounds::new(lower, upper, max_lower_subset)
}

/// Locations of a cached pair's clusters inside a combination, oriented the
/// way the pair is stored (higher cluster id first).
pub(crate) fn pair_locations(
    pair: &PairExtrema,
    c1: ClusterId,
    c1_loc: usize,
    c2_loc: usize,
) -> [usize; 2] {
    if pair.left == c1 {
        [c1_loc, c2_loc]
    } else {
        [c2_loc, c1_loc]
    }
}

/// Bounded collection of the k smallest or largest values seen.
struct TopExtrema {
    capacity: usize,
    ascending: bool,
    entries: Vec<(f64, [u32; 2])>,
}

impl TopExtrema {
    fn smallest(capacity: usize) -> Self {
        Self {
            capacity,
            ascending: true,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn largest(capacity: usize) -> Self {
        Self {
            capacity,
            ascending: false,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: f64, pair: [u32; 2]) {
        if self.capacity == 0 {
            return;
        }
        let ascending = self.ascending;
        let better = move |a: f64, b: f64| if ascending { a < b } else { a > b };
        if self.entries.len() == self.capacity {
            let worst = self.entries[self.entries.len() - 1].0;
            if !better(value, worst) {
                return;
            }
            self.entries.pop();
        }
        let pos = self
            .entries
            .partition_point(|&(v, _)| !better(value, v));
        self.entries.insert(pos, (value, pair));
    }

    fn into_pairs(self) -> Vec<[u32; 2]> {
        self.entries.into_iter().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_extrema_keeps_k_smallest_sorted() {
        let mut t = TopExtrema::smallest(3);
        for (i, v) in [5.0, 1.0, 4.0, 2.0, 3.0].into_iter().enumerate() {
            t.push(v, [i as u32, 0]);
        }
        assert_eq!(t.into_pairs(), vec![[1, 0], [3, 0], [4, 0]]);
    }

    #[test]
    fn top_extrema_keeps_k_largest_sorted() {
        let mut t = TopExtrema::largest(2);
        for (i, v) in [5.0, 1.0, 4.0, 2.0].into_iter().enumerate() {
            t.push(v, [i as u32, 0]);
        }
        assert_eq!(t.into_pairs(), vec![[0, 0], [2, 0]]);
    }

    #[test]
    fn zero_capacity_collects_nothing() {
        let mut t = TopExtrema::smallest(0);
        t.push(1.0, [0, 0]);
        assert!(t.into_pairs().is_empty());
    }
}
