//! Recursive bounding search.
//!
//! The branch-and-bound driver. The combinatorial space is walked complexity
//! level by complexity level (growing pattern sizes); within a level, one
//! logical task assesses each candidate combination and either decides it
//! from its bound alone or splits it along the cluster tree and recurses.
//! Tasks fork their children onto the rayon pool once a candidate's point
//! space is large enough to pay for scheduling, and join on all of them
//! before completing; results flow through the shared sink only.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use super::combination::{symmetry_check_full, ClusterCombination, SideList};
use super::discount;
use crate::clustering::ClusterIndex;
use crate::config::{QueryDiscipline, RunConfig};
use crate::error::{DetectiveError, Result};
use crate::metrics::{
    bound_combination, max_subset_similarity, BoundCache, BoundContext, SimilarityMetric,
};
use crate::queries::{ResultEntry, ResultSet};
use crate::stats::StatBag;
use crate::vecmath::PairwiseMatrix;

/// Below this candidate point-space size, children run sequentially inside
/// the parent task instead of forking.
const PARALLEL_CUTOFF: u64 = 20;

/// Shared state of one search run.
pub struct SearchState<'a> {
    pub config: &'a RunConfig,
    pub metric: &'a dyn SimilarityMetric,
    pub index: &'a ClusterIndex,
    pub data: &'a [Vec<f64>],
    pub distances: &'a PairwiseMatrix,
    pub cache: &'a BoundCache,
    pub stats: &'a StatBag,
    pub results: &'a ResultSet,

    /// Approximated-but-undecided candidates, re-examined exactly once the
    /// threshold has risen. Ordered by critical shrink factor: candidates
    /// whose decision is closest to flipping come first.
    postponed: Mutex<BinaryHeap<Reverse<PostponedEntry>>>,
    /// Current shrink factor; 1 during the unshrunk passes.
    shrink_bits: AtomicU64,
    max_approximation_size: f64,
}

struct PostponedEntry(ClusterCombination);

impl PartialEq for PostponedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.critical_shrink_factor() == other.0.critical_shrink_factor()
    }
}
impl Eq for PostponedEntry {}
impl PartialOrd for PostponedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PostponedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .critical_shrink_factor()
            .total_cmp(&other.0.critical_shrink_factor())
    }
}

impl<'a> SearchState<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &'a RunConfig,
        metric: &'a dyn SimilarityMetric,
        index: &'a ClusterIndex,
        data: &'a [Vec<f64>],
        distances: &'a PairwiseMatrix,
        cache: &'a BoundCache,
        stats: &'a StatBag,
        results: &'a ResultSet,
    ) -> Self {
        Self {
            config,
            metric,
            index,
            data,
            distances,
            cache,
            stats,
            results,
            postponed: Mutex::new(BinaryHeap::new()),
            shrink_bits: AtomicU64::new(1.0_f64.to_bits()),
            max_approximation_size: metric.max_approximation_size(config.bfs_ratio),
        }
    }

    pub(crate) fn bound_ctx(&self) -> BoundContext<'_> {
        BoundContext {
            index: self.index,
            data: self.data,
            distances: self.distances,
            cache: self.cache,
            stats: self.stats,
            empirical: self.config.empirical_bounding && self.metric.empirically_bounded(),
            discounting: self.config.discounting,
            retained_extrema: self.config.retained_extrema(),
        }
    }

    fn shrink_factor(&self) -> f64 {
        f64::from_bits(self.shrink_bits.load(Ordering::Relaxed))
    }

    fn set_shrink_factor(&self, value: f64) {
        self.shrink_bits.store(value.to_bits(), Ordering::Relaxed);
    }

    fn postpone(&self, cc: ClusterCombination) {
        self.postponed.lock().push(Reverse(PostponedEntry(cc)));
    }

    fn drain_postponed(&self) -> Vec<ClusterCombination> {
        let mut heap = self.postponed.lock();
        let mut out = Vec::with_capacity(heap.len());
        while let Some(Reverse(PostponedEntry(cc))) = heap.pop() {
            out.push(cc);
        }
        out
    }
}

/// The search driver.
pub struct RecursiveBounding<'a> {
    state: SearchState<'a>,
}

impl<'a> RecursiveBounding<'a> {
    pub fn new(state: SearchState<'a>) -> Result<Self> {
        if state.index.is_empty() {
            return Err(DetectiveError::invariant(
                "recursive-bounding",
                "cluster index is empty; build the index before searching",
            ));
        }
        Ok(Self { state })
    }

    #[must_use]
    pub fn state(&self) -> &SearchState<'a> {
        &self.state
    }

    /// Run the full search. Progressive stop is a normal completion.
    pub fn run(&self) -> Result<()> {
        let expand_top_k = matches!(
            self.state.config.query,
            QueryDiscipline::TopK | QueryDiscipline::Progressive
        );
        self.complexity_climb(expand_top_k)?;
        if self.state.results.stopped() {
            log::info!("search ended by progressive stop");
        }
        self.state.stats.add(
            &self.state.stats.positive_decisions,
            self.state.results.len() as u64,
        );
        Ok(())
    }

    /// Iterate pattern sizes from the minimal valid shape up to the
    /// configured maximum, re-running the bounding pass over a root
    /// candidate spanning the whole dataset at each level.
    fn complexity_climb(&self, expand_top_k: bool) -> Result<()> {
        let config = self.state.config;
        let (max_l, max_r) = (config.max_p_left, config.max_p_right);
        let (mut p_left, mut p_right) = if max_r > 0 { (1, 1) } else { (2, 0) };

        // The first level always runs unshrunk; the threshold has not risen
        // yet, so approximation would only cost completeness.
        let requested_shrink = config.shrink_factor;
        self.state.set_shrink_factor(1.0);

        loop {
            log::info!("starting on combinations with complexity ({p_left},{p_right})");
            let root =
                ClusterCombination::root(self.state.index, p_left, p_right, config.allow_vector_overlap);
            self.mine_level(root)?;
            log::info!(
                "done with complexity ({p_left},{p_right}), result set size {}",
                self.state.results.len()
            );

            if self.state.results.stopped() || (p_left == max_l && p_right == max_r) {
                return Ok(());
            }

            // Grow the side that is behind, left first.
            let expand_left = p_right == max_r || (p_left == p_right && p_left < max_l);

            if expand_top_k {
                self.expand_top_k(expand_left, p_left, p_right)?;
                if self.state.results.stopped() {
                    return Ok(());
                }
            }

            if expand_left {
                p_left += 1;
            } else {
                p_right += 1;
            }
            self.state.set_shrink_factor(requested_shrink);
        }
    }

    /// One complexity level: the shrunk scan, then the exact pass over
    /// postponed candidates.
    fn mine_level(&self, root: ClusterCombination) -> Result<()> {
        let shrink = self.state.shrink_factor();
        self.compute(root)?;
        log::debug!(
            "initial scan done, threshold {:.6}",
            self.state.results.threshold().get()
        );

        if shrink == 1.0 || self.state.results.stopped() {
            return Ok(());
        }

        // Re-examine approximated decisions exactly, cheapest flips first,
        // now that cheaper candidates have raised the threshold.
        self.state.set_shrink_factor(1.0);
        let postponed = self.state.drain_postponed();
        log::debug!("exact pass over {} postponed candidates", postponed.len());
        self.run_candidates(postponed)?;
        log::debug!(
            "exact pass done, threshold {:.6}",
            self.state.results.threshold().get()
        );
        Ok(())
    }

    /// Run a batch of candidates as independent tasks.
    fn run_candidates(&self, candidates: Vec<ClusterCombination>) -> Result<()> {
        if self.state.config.parallel {
            candidates
                .into_par_iter()
                .try_for_each(|cc| self.compute(cc))
        } else {
            for cc in candidates {
                self.compute(cc)?;
            }
            Ok(())
        }
    }

    /// One logical task: assess, then discount or split indecisive
    /// candidates, forking children once the subtree is large enough.
    pub(crate) fn compute(&self, mut cc: ClusterCombination) -> Result<()> {
        if self.state.results.stopped() {
            return Ok(());
        }

        self.assess(&mut cc)?;
        if cc.is_decisive() {
            return Ok(());
        }

        if discount::try_discount(&mut cc, self)? {
            return Ok(());
        }

        let children = cc.split(self.state.index);
        if self.state.config.parallel && cc.size() > PARALLEL_CUTOFF {
            self.state
                .stats
                .add(&self.state.stats.parallel_children, children.len() as u64);
            children.into_par_iter().try_for_each(|c| self.compute(c))
        } else {
            self.state
                .stats
                .add(&self.state.stats.sequential_children, children.len() as u64);
            for c in children {
                self.compute(c)?;
            }
            Ok(())
        }
    }

    /// Bound a candidate and decide it against the running threshold.
    fn assess(&self, cc: &mut ClusterCombination) -> Result<()> {
        let config = self.state.config;
        let ctx = self.state.bound_ctx();
        let bounds = bound_combination(self.state.metric, cc, &ctx);
        ctx.count_candidate(cc);

        let mut threshold = self.state.results.threshold().get();
        if cc.cardinality() > 2 {
            if config.min_jump > 0.0 {
                threshold = threshold.max(bounds.max_lower_subset + config.min_jump);
            }
            if config.irreducibility && bounds.max_lower_subset >= threshold {
                // A smaller pattern already explains the correlation.
                threshold = f64::MAX;
            }
        }

        let shrunk_upper = if config.query == QueryDiscipline::TopK {
            cc.shrunk_upper(
                self.state.shrink_factor(),
                self.state.max_approximation_size,
                self.state.index,
            )
        } else {
            bounds.upper
        };
        cc.set_critical_shrink_factor(threshold);

        if bounds.lower < threshold && shrunk_upper > threshold {
            cc.set_decisive(false);
            return Ok(());
        }

        cc.set_decisive(true);
        if shrunk_upper < threshold {
            self.state.stats.increment(&self.state.stats.negative_decisions);
            // Only approximately negative: the true upper bound still
            // clears the threshold, so the decision is re-checked later.
            if bounds.upper > threshold {
                self.state.postpone(cc.clone());
            }
        } else if bounds.lower >= threshold {
            cc.set_positive(true);
            let accepted = self.unpack_and_check(cc)?;
            if !accepted.is_empty() {
                self.state.results.add_all(accepted);
            }
        }
        Ok(())
    }

    /// Unpack a decisive-positive combination to singleton leaves and apply
    /// the pattern-level acceptance rules to each.
    fn unpack_and_check(&self, cc: &ClusterCombination) -> Result<Vec<ResultEntry>> {
        let config = self.state.config;
        let ctx = self.state.bound_ctx();
        let mut accepted = Vec::new();

        for mut leaf in cc.singletons(self.state.index) {
            let bounds = bound_combination(self.state.metric, &mut leaf, &ctx);
            if bounds.width().abs() > 1e-3 {
                return Err(DetectiveError::invariant(
                    "unpack",
                    format!("singleton combination {leaf} has non-degenerate bounds"),
                ));
            }

            let mut threshold = self.state.results.threshold().get();
            if leaf.cardinality() > 2 && (config.min_jump > 0.0 || config.irreducibility) {
                let subset_similarity = max_subset_similarity(self.state.metric, &leaf, &ctx);
                let jump_threshold = subset_similarity + config.min_jump;
                let irreducibility_threshold =
                    if config.irreducibility && subset_similarity >= threshold {
                        f64::MAX
                    } else {
                        threshold
                    };
                threshold = threshold.max(jump_threshold).max(irreducibility_threshold);
            }

            leaf.set_decisive(true);
            if bounds.lower >= threshold {
                leaf.set_positive(true);
                accepted.push(ResultEntry::from_combination(&leaf, self.state.index));
            }
        }
        Ok(accepted)
    }

    /// Between complexity levels, expand the current maximal-size results by
    /// one more singleton cluster and evaluate them exactly. This raises the
    /// running threshold before the next, more expensive level begins. The
    /// pre-expansion result set is restored afterwards (the raised threshold
    /// is kept) so the next level does not see duplicate entries.
    fn expand_top_k(&self, expand_left: bool, cur_l: usize, cur_r: usize) -> Result<()> {
        let state = &self.state;
        if state.results.is_empty() {
            return Ok(());
        }
        let snapshot = state.results.snapshot();
        let equal_sides = cur_l == cur_r;

        let mut bases: Vec<(SideList, SideList)> = Vec::new();
        for entry in &snapshot {
            if entry.lhs.len() != cur_l || entry.rhs.len() != cur_r {
                continue;
            }
            let to_side = |ids: &[u32]| -> SideList {
                ids.iter().map(|&v| state.index.singleton(v).id).collect()
            };
            let (lhs, rhs) = (to_side(&entry.lhs), to_side(&entry.rhs));
            if equal_sides {
                bases.push((rhs.clone(), lhs.clone()));
            }
            bases.push((lhs, rhs));
        }

        let mut expanded: HashSet<(SideList, SideList)> = HashSet::new();
        for (lhs, rhs) in bases {
            for v in 0..state.index.num_vectors() as u32 {
                let c = state.index.singleton(v);
                let mut new_lhs = lhs.clone();
                let mut new_rhs = rhs.clone();
                if expand_left {
                    new_lhs.push(c.id);
                } else {
                    new_rhs.push(c.id);
                }
                if !symmetry_check_full(&new_lhs, &new_rhs, state.index) {
                    continue;
                }
                expanded.insert((new_lhs, new_rhs));
            }
        }

        let candidates: Vec<ClusterCombination> = expanded
            .into_iter()
            .map(|(lhs, rhs)| {
                ClusterCombination::new(lhs, rhs, 0, 1, state.config.allow_vector_overlap)
            })
            .collect();
        log::debug!("top-k expansion pass over {} candidates", candidates.len());
        self.run_candidates(candidates)?;
        log::info!(
            "threshold after top-k expansion: {:.6}",
            state.results.threshold().get()
        );

        // On a progressive stop the expansion results ARE the final results;
        // restoring would throw accepted entries away.
        if !state.results.stopped() {
            state.results.restore(snapshot);
        }
        Ok(())
    }
}
