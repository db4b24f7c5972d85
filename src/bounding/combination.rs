//! Candidate combinations and their expansion logic.

use smallvec::SmallVec;

use super::bounds::ClusterBounds;
use super::factor::EmpiricalBoundFactor;
use crate::clustering::{Cluster, ClusterId, ClusterIndex};

/// Short inline list of cluster ids; patterns rarely exceed four per side.
pub type SideList = SmallVec<[ClusterId; 4]>;

/// Outcome of the per-child symmetry check during splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symmetry {
    /// Child is a valid replacement.
    Valid,
    /// Child violates a rule, later siblings may still pass.
    Skip,
    /// Child violates an ordering rule; sibling ids only grow, so every
    /// later child would violate it too.
    Terminate,
}

/// One candidate grouping of clusters, the search-state entity.
///
/// The left and right side together denote all patterns obtainable by picking
/// one member vector from each listed cluster. A combination starts
/// unbounded, gets a similarity interval from the metric, and is then either
/// decisive (accepted or discarded wholesale) or split into child
/// combinations along the cluster tree. Children inherit the parent's
/// tightened bounds as a pre-seed, so bounds only ever narrow down a branch.
#[derive(Debug, Clone)]
pub struct ClusterCombination {
    lhs: SideList,
    rhs: SideList,
    level: u32,
    size: u64,
    allow_overlap: bool,

    bounds: Option<ClusterBounds>,
    bounded: bool,
    decisive: bool,
    positive: bool,
    discounted: bool,
    critical_shrink_factor: f64,
    factors: Vec<EmpiricalBoundFactor>,
}

impl PartialEq for ClusterCombination {
    fn eq(&self, other: &Self) -> bool {
        self.lhs == other.lhs && self.rhs == other.rhs
    }
}

impl Eq for ClusterCombination {}

impl std::hash::Hash for ClusterCombination {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lhs.hash(state);
        self.rhs.hash(state);
    }
}

impl std::fmt::Display for ClusterCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_side = |side: &SideList| {
            side.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        write!(f, "{} | {}", fmt_side(&self.lhs), fmt_side(&self.rhs))
    }
}

impl ClusterCombination {
    #[must_use]
    pub fn new(lhs: SideList, rhs: SideList, level: u32, size: u64, allow_overlap: bool) -> Self {
        Self {
            lhs,
            rhs,
            level,
            size,
            allow_overlap,
            bounds: None,
            bounded: false,
            decisive: false,
            positive: false,
            discounted: false,
            critical_shrink_factor: f64::MAX,
            factors: Vec::new(),
        }
    }

    /// The root candidate spanning the whole dataset: the root cluster
    /// repeated `p_left` and `p_right` times.
    #[must_use]
    pub fn root(index: &ClusterIndex, p_left: usize, p_right: usize, allow_overlap: bool) -> Self {
        let root = index.root();
        let lhs = SideList::from_elem(root.id, p_left);
        let rhs = SideList::from_elem(root.id, p_right);
        let size = (root.size() as u64).pow((p_left + p_right) as u32);
        Self::new(lhs, rhs, 0, size, allow_overlap)
    }

    #[must_use]
    pub fn lhs(&self) -> &[ClusterId] {
        &self.lhs
    }

    #[must_use]
    pub fn rhs(&self) -> &[ClusterId] {
        &self.rhs
    }

    /// All cluster ids, left side first.
    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.lhs.iter().chain(self.rhs.iter()).copied()
    }

    /// Number of clusters across both sides (the pattern size).
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.lhs.len() + self.rhs.len()
    }

    /// Point-space size: the product of member counts of all clusters.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Search depth at which this combination was created.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn allow_overlap(&self) -> bool {
        self.allow_overlap
    }

    /// Whether every cluster is a singleton.
    #[must_use]
    pub fn is_singleton(&self, index: &ClusterIndex) -> bool {
        self.cluster_ids().all(|id| index.cluster(id).is_singleton())
    }

    #[must_use]
    pub fn bounds(&self) -> Option<&ClusterBounds> {
        self.bounds.as_ref()
    }

    /// The interval of a bounded combination.
    ///
    /// Panics if the combination was never bounded; callers on the search
    /// path establish bounds before reading them.
    #[must_use]
    pub fn expect_bounds(&self) -> &ClusterBounds {
        self.bounds
            .as_ref()
            .expect("combination bounds read before bounding")
    }

    /// Accepted similarity of a decided combination (the lower bound, which
    /// equals the upper bound at singleton granularity).
    #[must_use]
    pub fn similarity(&self) -> f64 {
        self.expect_bounds().lower
    }

    /// Narrow the current interval, or install it if absent.
    pub fn update_bounds(&mut self, new_bounds: ClusterBounds) {
        match &mut self.bounds {
            Some(b) => b.update(&new_bounds),
            None => self.bounds = Some(new_bounds),
        }
    }

    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    pub fn set_bounded(&mut self, bounded: bool) {
        self.bounded = bounded;
    }

    #[must_use]
    pub fn is_decisive(&self) -> bool {
        self.decisive
    }

    pub fn set_decisive(&mut self, decisive: bool) {
        self.decisive = decisive;
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.positive
    }

    pub fn set_positive(&mut self, positive: bool) {
        self.positive = positive;
    }

    #[must_use]
    pub fn is_discounted(&self) -> bool {
        self.discounted
    }

    pub fn set_discounted(&mut self, discounted: bool) {
        self.discounted = discounted;
    }

    /// Record a bound ingredient. Ignored once the combination is bounded:
    /// a cached re-bounding must not duplicate the ingredient list.
    pub fn add_factor(&mut self, factor: EmpiricalBoundFactor) {
        if self.bounded {
            return;
        }
        self.factors.push(factor);
    }

    #[must_use]
    pub fn factors(&self) -> &[EmpiricalBoundFactor] {
        &self.factors
    }

    pub fn factors_mut(&mut self) -> &mut [EmpiricalBoundFactor] {
        &mut self.factors
    }

    /// Geometric mean of the cluster radii, a measure of how coarse this
    /// combination still is.
    #[must_use]
    pub fn radii_geometric_mean(&self, index: &ClusterIndex) -> f64 {
        let product: f64 = self.cluster_ids().map(|id| index.cluster(id).radius()).product();
        product.powf(1.0 / self.cardinality() as f64)
    }

    /// Upper bound shrunk toward the interval center by `shrink_factor`.
    ///
    /// Only coarse non-singleton combinations are shrunk; once the radii
    /// geometric mean exceeds `max_approximation_size` the true upper bound
    /// is used.
    #[must_use]
    pub fn shrunk_upper(
        &self,
        shrink_factor: f64,
        max_approximation_size: f64,
        index: &ClusterIndex,
    ) -> f64 {
        let bounds = self.expect_bounds();
        if !self.is_singleton(index) && self.radii_geometric_mean(index) < max_approximation_size {
            bounds.center() + shrink_factor * (bounds.upper - bounds.center())
        } else {
            bounds.upper
        }
    }

    /// The shrink factor at which the decision against `threshold` would
    /// flip; postponed candidates are re-examined in this order.
    pub fn set_critical_shrink_factor(&mut self, threshold: f64) {
        let bounds = self.expect_bounds();
        let span = bounds.upper - bounds.center();
        self.critical_shrink_factor = if span == 0.0 {
            f64::MAX
        } else {
            (threshold - bounds.center()) / span
        };
    }

    #[must_use]
    pub fn critical_shrink_factor(&self) -> f64 {
        self.critical_shrink_factor
    }

    /// The same combination with sides swapped, bounds and flags preserved.
    #[must_use]
    pub fn mirror(&self) -> Self {
        let mut cc = Self::new(
            self.rhs.clone(),
            self.lhs.clone(),
            self.level,
            self.size,
            self.allow_overlap,
        );
        cc.bounds = self.bounds;
        cc.positive = self.positive;
        cc.decisive = self.decisive;
        cc
    }

    /// Position (into the concatenated cluster list) of the multi-member
    /// cluster with the largest radius, ties broken leftmost.
    #[must_use]
    pub fn break_position(&self, index: &ClusterIndex) -> usize {
        let mut pos = 0;
        let mut max_radius = -1.0;
        for (i, id) in self.cluster_ids().enumerate() {
            let c = index.cluster(id);
            if c.size() == 1 {
                continue;
            }
            if c.radius() > max_radius {
                max_radius = c.radius();
                pos = i;
            }
        }
        pos
    }

    /// Split into child combinations by replacing the coarsest cluster with
    /// each of its children, dropping candidates that would enumerate an
    /// already-covered grouping.
    ///
    /// Children are pre-seeded with this combination's bounds so that bounds
    /// can only tighten down the branch.
    #[must_use]
    pub fn split(&self, index: &ClusterIndex) -> Vec<ClusterCombination> {
        let l_len = self.lhs.len();
        let pos = self.break_position(index);
        let is_lhs = pos < l_len;
        let side_pos = if is_lhs { pos } else { pos - l_len };

        let (old_side, other_side) = if is_lhs {
            (&self.lhs, &self.rhs)
        } else {
            (&self.rhs, &self.lhs)
        };
        let largest = index.cluster(old_side[side_pos]);

        let mut out = Vec::with_capacity(largest.children.len());
        for &child_id in &largest.children {
            let child = index.cluster(child_id);
            match self.child_symmetry(child, old_side, other_side, side_pos, is_lhs) {
                Symmetry::Terminate => break,
                Symmetry::Skip => continue,
                Symmetry::Valid => {}
            }

            let mut new_side = old_side.clone();
            new_side[side_pos] = child_id;
            let (new_lhs, new_rhs) = if is_lhs {
                (new_side, self.rhs.clone())
            } else {
                (self.lhs.clone(), new_side)
            };

            let size = self.size / largest.size() as u64 * child.size() as u64;
            let mut cc =
                ClusterCombination::new(new_lhs, new_rhs, self.level + 1, size, self.allow_overlap);
            if let Some(b) = self.bounds {
                cc.update_bounds(b);
            }
            cc.set_discounted(self.discounted);
            out.push(cc);
        }
        out
    }

    /// Symmetry rules for one candidate replacement, preventing duplicate
    /// enumeration of the same unordered grouping:
    ///
    /// 1. sides stay in non-increasing id order,
    /// 2. no singleton vector appears twice (unless overlap is allowed),
    /// 3. of two equal-cardinality orientations only one survives.
    fn child_symmetry(
        &self,
        child: &Cluster,
        curr_side: &SideList,
        other_side: &SideList,
        new_pos: usize,
        is_lhs: bool,
    ) -> Symmetry {
        // Ordering violations terminate the loop: sibling ids only grow.
        if new_pos > 0 && curr_side[new_pos - 1] < child.id {
            return Symmetry::Terminate;
        }
        if new_pos + 1 < curr_side.len() && curr_side[new_pos + 1] > child.id {
            return Symmetry::Terminate;
        }

        if !self.allow_overlap
            && child.size() == 1
            && (curr_side.contains(&child.id) || other_side.contains(&child.id))
        {
            return Symmetry::Skip;
        }

        // Two-side tie-break for the leading cluster of equally long sides.
        if new_pos == 0 && curr_side.len() == other_side.len() {
            if is_lhs && child.id < other_side[0] {
                return Symmetry::Skip;
            }
            if !is_lhs && child.id > other_side[0] {
                return Symmetry::Terminate;
            }
        }
        Symmetry::Valid
    }

    /// Recursively split down to combinations made of singleton clusters
    /// only.
    #[must_use]
    pub fn singletons(&self, index: &ClusterIndex) -> Vec<ClusterCombination> {
        if self.is_singleton(index) {
            return vec![self.clone()];
        }
        self.split(index)
            .into_iter()
            .flat_map(|cc| cc.singletons(index))
            .collect()
    }

    /// Drop the cluster at `side_pos` of the chosen side, producing the
    /// size-reduced sub-pattern used for min-jump and irreducibility checks.
    #[must_use]
    pub fn reduce(&self, index: &ClusterIndex, side_pos: usize, reduce_lhs: bool) -> Self {
        let (lhs, rhs): (SideList, SideList) = if reduce_lhs {
            let lhs = self
                .lhs
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != side_pos)
                .map(|(_, &id)| id)
                .collect();
            (lhs, self.rhs.clone())
        } else {
            let rhs = self
                .rhs
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != side_pos)
                .map(|(_, &id)| id)
                .collect();
            (self.lhs.clone(), rhs)
        };

        let mut cc = Self::new(lhs, rhs, self.level.saturating_sub(1), 0, self.allow_overlap);
        cc.size = cc
            .cluster_ids()
            .map(|id| index.cluster(id).size() as u64)
            .product();
        cc
    }

    /// All one-cluster-smaller sub-patterns. A side shrinks only while it
    /// keeps at least one cluster.
    #[must_use]
    pub fn subset_combinations(&self, index: &ClusterIndex) -> Vec<ClusterCombination> {
        let mut out = Vec::with_capacity(self.cardinality());
        if self.lhs.len() > 1 {
            for i in 0..self.lhs.len() {
                out.push(self.reduce(index, i, true));
            }
        }
        if self.rhs.len() > 1 {
            for i in 0..self.rhs.len() {
                out.push(self.reduce(index, i, false));
            }
        }
        out
    }
}

/// Symmetry rules applied to a fully formed combination, used by the top-k
/// expansion pass and the discounting cut materialization.
#[must_use]
pub fn symmetry_check_full(lhs: &[ClusterId], rhs: &[ClusterId], index: &ClusterIndex) -> bool {
    for side in [lhs, rhs] {
        for w in side.windows(2) {
            if w[0] < w[1] {
                return false;
            }
        }
    }

    let all: Vec<ClusterId> = lhs.iter().chain(rhs.iter()).copied().collect();
    for i in 0..all.len() {
        for j in i + 1..all.len() {
            if all[i] == all[j] && index.cluster(all[i]).is_singleton() {
                return false;
            }
        }
    }

    if lhs.len() == rhs.len() && !lhs.is_empty() && lhs[0] >= rhs[0] {
        return false;
    }
    true
}
