//! Run configuration.
//!
//! All knobs of a search run live in one strongly-typed, eagerly validated
//! record. Validation happens once, before any computation; a run never
//! starts from a partially-valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DetectiveError, Result};

/// Similarity metric selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Pearson correlation between aggregated sides.
    Pearson,
    /// Spearman rank correlation (Pearson over rank-transformed vectors).
    Spearman,
    /// Euclidean distance similarity `1 / (1 + d)`.
    Euclidean,
    /// Manhattan distance similarity `1 / (1 + d)`.
    Manhattan,
    /// Multipole (one-sided spectral bound on linear dependence).
    Multipole,
    /// Total correlation (one-sided, joint-entropy based).
    TotalCorrelation,
}

impl MetricKind {
    /// Whether the metric supports empirical (extrema-based) cluster bounds.
    #[must_use]
    pub fn empirically_bounded(self) -> bool {
        !matches!(self, MetricKind::Manhattan)
    }

    /// Whether patterns have two sides. One-sided metrics only ever grow the
    /// left side and require `max_p_right == 0`.
    #[must_use]
    pub fn two_sided(self) -> bool {
        !matches!(self, MetricKind::Multipole | MetricKind::TotalCorrelation)
    }
}

/// Query discipline of the result aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryDiscipline {
    /// Accept everything with similarity at or above `tau`.
    Threshold,
    /// Keep the `top_k` highest-similarity results.
    TopK,
    /// Stop as soon as `top_k` results at or above `tau` were found.
    Progressive,
}

/// Immutable configuration of one search run.
///
/// Build with [`RunConfig::new`], adjust with the `with_*` methods, then pass
/// to [`crate::Detective`]. The engine calls [`RunConfig::validate`] before
/// touching any data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Similarity metric.
    pub metric: MetricKind,
    /// Maximum number of vectors on the left side of a pattern.
    pub max_p_left: usize,
    /// Maximum number of vectors on the right side of a pattern.
    pub max_p_right: usize,

    /// Query discipline.
    pub query: QueryDiscipline,
    /// Similarity threshold (threshold and progressive queries).
    pub tau: f64,
    /// Result count for top-k and progressive queries.
    pub top_k: usize,
    /// Require accepted patterns to beat their best subset by this margin.
    pub min_jump: f64,
    /// Reject patterns whose subset already clears the threshold.
    pub irreducibility: bool,
    /// Upper-bound shrink factor for top-k queries, in `[0, 1]`.
    /// 1 disables shrinking; 0 shrinks the upper bound to the interval center.
    pub shrink_factor: f64,
    /// Fraction of the similarity range used to derive the maximum
    /// approximation size for shrinking, in `[0, 1]`.
    pub bfs_ratio: f64,
    /// Allow the same vector to appear on both (or twice on one) side.
    pub allow_vector_overlap: bool,

    /// Sub-clusters per split. `None` picks a metric-dependent default
    /// (30 for empirically bounded metrics, 50 otherwise).
    pub branching_factor: Option<usize>,
    /// Maximum depth of the cluster tree.
    pub max_levels: usize,
    /// Clustering runs per node; the most compact run wins.
    pub clustering_retries: usize,
    /// Shrink rate of the distance threshold per tree level, in `(0, 1]`.
    pub epsilon_multiplier: f64,
    /// Multiply the branching factor by 5 for the first `k` tree levels.
    pub break_first_levels: usize,
    /// Use geometric mean centroids instead of representative data points.
    pub geo_centroid: bool,

    /// Use empirical (extrema-based) cluster bounds where supported.
    pub empirical_bounding: bool,

    /// Enable bound discounting.
    pub discounting: bool,
    /// Minimum critical shrink factor for a combination to be discounted.
    pub discount_threshold: f64,
    /// Extrema distances retained per cluster pair for discounting.
    pub discount_top_k: usize,
    /// Rank steps taken per discount iteration.
    pub discount_step: usize,

    /// Run the search on the rayon thread pool.
    pub parallel: bool,
    /// Seed for clustering randomness; equal seeds give equal runs.
    pub seed: u64,
}

impl RunConfig {
    /// Configuration with defaults for everything but the pattern shape.
    #[must_use]
    pub fn new(metric: MetricKind, max_p_left: usize, max_p_right: usize) -> Self {
        Self {
            metric,
            max_p_left,
            max_p_right,
            query: QueryDiscipline::Threshold,
            tau: 0.0,
            top_k: 100,
            min_jump: 0.0,
            irreducibility: false,
            shrink_factor: 1.0,
            bfs_ratio: 0.5,
            allow_vector_overlap: false,
            branching_factor: None,
            max_levels: 20,
            clustering_retries: 20,
            epsilon_multiplier: 0.8,
            break_first_levels: 0,
            geo_centroid: false,
            empirical_bounding: true,
            discounting: false,
            discount_threshold: 0.7,
            discount_top_k: 10,
            discount_step: 1,
            parallel: true,
            seed: 0,
        }
    }

    #[must_use]
    pub fn with_threshold_query(mut self, tau: f64) -> Self {
        self.query = QueryDiscipline::Threshold;
        self.tau = tau;
        self.top_k = 0;
        self.shrink_factor = 1.0;
        self
    }

    #[must_use]
    pub fn with_top_k_query(mut self, top_k: usize, shrink_factor: f64) -> Self {
        self.query = QueryDiscipline::TopK;
        self.top_k = top_k;
        self.shrink_factor = shrink_factor;
        self.tau = 1e-6;
        self
    }

    #[must_use]
    pub fn with_progressive_query(mut self, tau: f64, top_k: usize) -> Self {
        self.query = QueryDiscipline::Progressive;
        self.tau = tau;
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_discounting(mut self, threshold: f64, top_k: usize, step: usize) -> Self {
        self.discounting = true;
        self.discount_threshold = threshold;
        self.discount_top_k = top_k;
        self.discount_step = step;
        self
    }

    #[must_use]
    pub fn with_min_jump(mut self, min_jump: f64) -> Self {
        self.min_jump = min_jump;
        self
    }

    #[must_use]
    pub fn with_irreducibility(mut self) -> Self {
        self.irreducibility = true;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Branching factor after applying the metric-dependent default.
    #[must_use]
    pub fn resolved_branching_factor(&self) -> usize {
        self.branching_factor
            .unwrap_or(if self.metric.empirically_bounded() { 30 } else { 50 })
    }

    /// Check the configuration for contradictions and out-of-range values.
    ///
    /// Every violation is fatal; there is no partial run.
    pub fn validate(&self) -> Result<()> {
        fn fail(msg: impl Into<String>) -> Result<()> {
            Err(DetectiveError::Config(msg.into()))
        }

        if self.max_p_left == 0 {
            return fail("max_p_left must be at least 1");
        }
        if self.max_p_left > 10 || self.max_p_right > 10 {
            return fail("pattern sides larger than 10 are not supported");
        }
        if !self.metric.two_sided() && self.max_p_right != 0 {
            return fail(format!(
                "{:?} is one-sided and requires max_p_right == 0",
                self.metric
            ));
        }
        if self.metric.two_sided() && self.max_p_right == 0 {
            return fail(format!(
                "{:?} is two-sided and requires max_p_right >= 1",
                self.metric
            ));
        }
        if !self.metric.two_sided() && self.max_p_left < 2 {
            return fail("one-sided patterns need max_p_left >= 2");
        }

        match self.query {
            QueryDiscipline::Threshold => {
                if self.tau == 0.0 {
                    return fail("threshold query requires tau");
                }
                if self.shrink_factor != 1.0 {
                    return fail("shrink_factor applies to top-k queries only");
                }
            }
            QueryDiscipline::TopK => {
                if self.top_k == 0 {
                    return fail("top-k query requires top_k > 0");
                }
                if self.min_jump > 0.0 || self.irreducibility {
                    return fail("min_jump and irreducibility do not apply to top-k queries");
                }
            }
            QueryDiscipline::Progressive => {
                if self.tau == 0.0 {
                    return fail("progressive query requires tau");
                }
                if self.top_k == 0 {
                    return fail("progressive query requires top_k > 0");
                }
            }
        }

        if self.min_jump > 0.0 && self.irreducibility {
            return fail("min_jump and irreducibility are mutually exclusive");
        }
        if !(0.0..=1.0).contains(&self.shrink_factor) {
            return fail("shrink_factor must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.bfs_ratio) {
            return fail("bfs_ratio must be in [0, 1]");
        }
        if self.min_jump < 0.0 {
            return fail("min_jump must be non-negative");
        }

        if self.discounting {
            if !self.metric.empirically_bounded() {
                return fail(format!(
                    "discounting requires empirical bounds, which {:?} does not provide",
                    self.metric
                ));
            }
            if !self.empirical_bounding {
                return fail("discounting requires empirical_bounding");
            }
            if self.discount_top_k == 0 || self.discount_step == 0 {
                return fail("discount_top_k and discount_step must be positive");
            }
            if !(0.0..=2.0).contains(&self.discount_threshold) {
                return fail("discount_threshold must be in [0, 2]");
            }
        }

        if self.max_levels < 2 {
            return fail("max_levels must be at least 2");
        }
        if self.clustering_retries == 0 {
            return fail("clustering_retries must be positive");
        }
        if !(0.0..=1.0).contains(&self.epsilon_multiplier) {
            return fail("epsilon_multiplier must be in [0, 1]");
        }
        if self.branching_factor == Some(0) {
            return fail("branching_factor must be positive");
        }

        Ok(())
    }

    /// Extrema distances actually retained per cluster pair: the configured
    /// count scaled by the rank step, so every discount iteration has a full
    /// step of ranks available.
    #[must_use]
    pub fn retained_extrema(&self) -> usize {
        self.discount_top_k * self.discount_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_query_validates() {
        let cfg = RunConfig::new(MetricKind::Pearson, 1, 2).with_threshold_query(0.7);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn discounting_on_manhattan_is_rejected() {
        let cfg = RunConfig::new(MetricKind::Manhattan, 1, 2)
            .with_threshold_query(0.7)
            .with_discounting(0.7, 10, 1);
        assert!(matches!(cfg.validate(), Err(DetectiveError::Config(_))));
    }

    #[test]
    fn one_sided_metric_rejects_right_side() {
        let cfg = RunConfig::new(MetricKind::Multipole, 3, 1).with_threshold_query(0.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn top_k_query_rejects_min_jump() {
        let mut cfg = RunConfig::new(MetricKind::Pearson, 1, 2).with_top_k_query(10, 0.0);
        cfg.min_jump = 0.05;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shrink_factor_range_is_enforced() {
        let cfg = RunConfig::new(MetricKind::Pearson, 1, 2).with_top_k_query(10, 1.5);
        assert!(cfg.validate().is_err());
    }
}
