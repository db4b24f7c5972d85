//! Bound discounting.
//!
//! Tightens an indecisive combination's bound without geometric subdivision.
//! The recorded bound ingredients are ranked lists of pairwise extrema; each
//! iteration greedily advances the ingredient whose next-worse extremum
//! lowers the recomposed bound the most per unit of coverage given up. Every
//! skipped extremum is materialized as a narrow "cut" combination (the two
//! clusters replaced by the extremal singletons), so the excluded point
//! pairs are still searched and no coverage is lost. If the bound falls
//! below the threshold the whole subtree is resolved cheaply; otherwise the
//! caller falls back to a full split and the cuts are discarded.

use std::collections::HashSet;

use super::combination::{ClusterCombination, SideList};
use super::search::RecursiveBounding;
use crate::clustering::ClusterId;
use crate::error::{DetectiveError, Result};

/// Attempt to resolve an indecisive combination by discounting.
///
/// Returns `true` when the combination was decided (the caller must not
/// split it further), `false` when full splitting is still required.
pub(crate) fn try_discount(cc: &mut ClusterCombination, rb: &RecursiveBounding) -> Result<bool> {
    let state = rb.state();
    let config = state.config;

    let eligible = config.discounting
        && state.metric.empirically_bounded()
        && !cc.is_discounted()
        && cc.cardinality() > 2
        && cc.critical_shrink_factor() > config.discount_threshold;
    if !eligible {
        return Ok(false);
    }

    state.stats.increment(&state.stats.discounted);
    match discount_bounds(cc, rb)? {
        Some(cuts) => {
            state
                .stats
                .add(&state.stats.discount_cuts, cuts.len() as u64);
            if config.parallel {
                use rayon::prelude::*;
                cuts.into_par_iter().try_for_each(|cut| rb.compute(cut))?;
            } else {
                for cut in cuts {
                    rb.compute(cut)?;
                }
            }
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Greedy rank-advancing loop. On success returns the cut combinations that
/// exactly cover the extrema the discounted bound ignores.
fn discount_bounds(
    cc: &mut ClusterCombination,
    rb: &RecursiveBounding,
) -> Result<Option<Vec<ClusterCombination>>> {
    let state = rb.state();
    let config = state.config;

    if !cc.is_bounded() {
        return Err(DetectiveError::invariant(
            "discounting",
            format!("cannot discount unbounded combination {cc}"),
        ));
    }
    // Positive combinations are never discounted; there is nothing to cut
    // away from an accepted subtree.
    if cc.similarity() >= config.tau || cc.is_positive() {
        return Ok(None);
    }
    if cc.factors().is_empty() {
        return Err(DetectiveError::invariant(
            "discounting",
            format!("no recorded bound ingredients for combination {cc}"),
        ));
    }

    // Inherited by children on the fallback path, so a subtree is only ever
    // discounted once.
    cc.set_discounted(true);

    let ctx = state.bound_ctx();
    let p_left = cc.lhs().len();
    let p_right = cc.rhs().len();
    let mut similarity = state
        .metric
        .empirical_similarity(cc.factors(), p_left, p_right, &ctx);

    let mut cuts = Vec::new();
    let mut seen_cuts: HashSet<(SideList, SideList)> = HashSet::new();
    let mut push_cut = |cuts: &mut Vec<ClusterCombination>, cut: ClusterCombination| {
        if seen_cuts.insert((cut.lhs().into(), cut.rhs().into())) {
            cuts.push(cut);
        }
    };

    while similarity > config.tau {
        let Some((best, best_similarity)) = optimal_factor(cc, similarity, p_left, p_right, rb)
        else {
            return Ok(None);
        };
        // No ingredient is worth advancing anymore.
        if best_similarity >= similarity {
            return Ok(None);
        }

        for _ in 0..config.discount_step {
            let factor = &cc.factors()[best];
            let extrema = factor.extrema_pair();
            let locations = factor.locations();
            let is_pair = factor.pair().is_pair;
            let (pair_left, pair_right) = (factor.pair().left, factor.pair().right);

            if let Some(cut) = materialize_cut(cc, extrema, locations, is_pair, rb) {
                push_cut(&mut cuts, cut);
            }
            // A pair whose clusters overlap realizes the extremum in both
            // orientations; cut the mirror as well.
            if is_pair
                && state.index.cluster(pair_left).contains(extrema[1])
                && state.index.cluster(pair_right).contains(extrema[0])
            {
                let mirrored = [locations[1], locations[0]];
                if let Some(cut) = materialize_cut(cc, extrema, mirrored, is_pair, rb) {
                    push_cut(&mut cuts, cut);
                }
            }

            if cc.factors()[best].is_max_rank(config.discount_step) {
                return Ok(None);
            }
            cc.factors_mut()[best].advance_rank(1);
        }

        similarity = best_similarity;
    }

    Ok(Some(cuts))
}

/// The ingredient whose advance decreases the recomposed bound the most per
/// unit of coverage lost, with the bound it would achieve.
fn optimal_factor(
    cc: &mut ClusterCombination,
    current: f64,
    p_left: usize,
    p_right: usize,
    rb: &RecursiveBounding,
) -> Option<(usize, f64)> {
    let state = rb.state();
    let step = state.config.discount_step;
    let ctx = state.bound_ctx();

    let mut best: Option<(usize, f64)> = None;
    let mut best_weight = f64::MIN;

    for i in 0..cc.factors().len() {
        if cc.factors()[i].is_max_rank(step) {
            continue;
        }

        cc.factors_mut()[i].advance_rank(step);
        let candidate = state
            .metric
            .empirical_similarity(cc.factors(), p_left, p_right, &ctx);
        cc.factors_mut()[i].retreat_rank(step);

        let delta = current - candidate;
        let weight = delta * delta * cc.factors()[i].pair().coverage as f64;
        if weight > best_weight {
            best_weight = weight;
            best = Some((i, candidate));
        }
    }
    best
}

/// Build the cut combination for one excluded extremum: the contributing
/// clusters are replaced by the extremal singleton points.
///
/// Sides are re-canonicalized (descending ids, tie-broken orientation)
/// rather than symmetry-rejected: a cut stands for assignments nothing else
/// covers, so dropping one would lose coverage. Only cuts whose point space
/// is empty (a singleton vector repeated without overlap allowed) are
/// discarded.
fn materialize_cut(
    cc: &ClusterCombination,
    extrema: [u32; 2],
    locations: [usize; 2],
    is_pair: bool,
    rb: &RecursiveBounding,
) -> Option<ClusterCombination> {
    let state = rb.state();
    let index = state.index;

    let mut clusters: Vec<ClusterId> = cc.cluster_ids().collect();
    let mut size = cc.size();

    size /= index.cluster(clusters[locations[0]]).size() as u64;
    clusters[locations[0]] = index.singleton(extrema[0]).id;
    if is_pair {
        size /= index.cluster(clusters[locations[1]]).size() as u64;
        clusters[locations[1]] = index.singleton(extrema[1]).id;
    }

    let l_len = cc.lhs().len();
    let mut lhs: SideList = clusters[..l_len].iter().copied().collect();
    let mut rhs: SideList = clusters[l_len..].iter().copied().collect();
    lhs.sort_unstable_by(|a, b| b.cmp(a));
    rhs.sort_unstable_by(|a, b| b.cmp(a));
    if lhs.len() == rhs.len() && lhs[0] < rhs[0] {
        std::mem::swap(&mut lhs, &mut rhs);
    }

    if !cc.allow_overlap() {
        let all: Vec<ClusterId> = lhs.iter().chain(rhs.iter()).copied().collect();
        for i in 0..all.len() {
            for j in i + 1..all.len() {
                if all[i] == all[j] && index.cluster(all[i]).is_singleton() {
                    return None;
                }
            }
        }
    }

    let mut cut = ClusterCombination::new(lhs, rhs, cc.level() + 1, size, cc.allow_overlap());
    cut.set_discounted(true);
    Some(cut)
}
