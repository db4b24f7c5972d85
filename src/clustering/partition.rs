//! Distance-capped partitioning of a point set.
//!
//! A single pass over the (pre-shuffled) points: each point joins the nearest
//! existing group, unless it lies further than `epsilon` from every group
//! centroid and the group budget is not exhausted, in which case it founds a
//! new group with itself as the representative centroid. With `epsilon <= 0`
//! every point founds its own group, which is how the tree bottoms out into
//! singletons.

use crate::vecmath::PairwiseMatrix;

/// A candidate sub-cluster before it is admitted into the index.
#[derive(Debug, Clone)]
pub(crate) struct ClusterDraft {
    pub centroid_idx: u32,
    pub members: Vec<u32>,
}

impl ClusterDraft {
    /// Covering radius under the representative centroid.
    pub(crate) fn radius(&self, distances: &PairwiseMatrix) -> f64 {
        self.members
            .iter()
            .map(|&m| distances.get(m as usize, self.centroid_idx as usize))
            .fold(0.0, f64::max)
    }

    /// Compactness score of this draft, lower is tighter.
    pub(crate) fn score(&self, distances: &PairwiseMatrix) -> f64 {
        self.radius(distances) / self.members.len() as f64
    }
}

/// Partition `points` into at most `max_clusters` groups.
pub(crate) fn partition_max_clusters(
    points: &[u32],
    epsilon: f64,
    max_clusters: usize,
    distances: &PairwiseMatrix,
) -> Vec<ClusterDraft> {
    let mut drafts: Vec<ClusterDraft> = Vec::with_capacity(max_clusters.min(points.len()));

    for &p in points {
        let nearest = drafts
            .iter()
            .enumerate()
            .map(|(i, d)| (i, distances.get(p as usize, d.centroid_idx as usize)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((i, dist)) if dist <= epsilon || drafts.len() >= max_clusters => {
                drafts[i].members.push(p);
            }
            _ => drafts.push(ClusterDraft {
                centroid_idx: p,
                members: vec![p],
            }),
        }
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vecmath;

    fn line_points(n: usize) -> (Vec<Vec<f64>>, PairwiseMatrix) {
        let data: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let m = PairwiseMatrix::build(n, false, |i, j| vecmath::euclidean(&data[i], &data[j]));
        (data, m)
    }

    #[test]
    fn zero_epsilon_yields_singletons() {
        let (_, m) = line_points(6);
        let points: Vec<u32> = (0..6).collect();
        let drafts = partition_max_clusters(&points, 0.0, 6, &m);
        assert_eq!(drafts.len(), 6);
        assert!(drafts.iter().all(|d| d.members.len() == 1));
    }

    #[test]
    fn budget_caps_cluster_count() {
        let (_, m) = line_points(10);
        let points: Vec<u32> = (0..10).collect();
        let drafts = partition_max_clusters(&points, 0.0, 3, &m);
        assert_eq!(drafts.len(), 3);
        let total: usize = drafts.iter().map(|d| d.members.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn nearby_points_join_the_same_group() {
        let (_, m) = line_points(10);
        let points: Vec<u32> = (0..10).collect();
        // Everything is within distance 9 of point 0.
        let drafts = partition_max_clusters(&points, 9.0, 5, &m);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].centroid_idx, 0);
        assert_eq!(drafts[0].members.len(), 10);
    }

    #[test]
    fn every_point_is_assigned_exactly_once() {
        let (_, m) = line_points(20);
        let points: Vec<u32> = (0..20).rev().collect();
        let drafts = partition_max_clusters(&points, 2.5, 4, &m);
        let mut seen: Vec<u32> = drafts.iter().flat_map(|d| d.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }
}
