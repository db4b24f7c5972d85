//! Top-down construction of the cluster tree.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use super::cluster::{Cluster, ClusterId};
use super::partition::{partition_max_clusters, ClusterDraft};
use crate::vecmath::PairwiseMatrix;

/// Parameters of one index build, resolved from the run configuration.
#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Sub-clusters per split.
    pub branching_factor: usize,
    /// Maximum tree depth.
    pub max_levels: usize,
    /// Partitioning runs per node; the most compact run wins.
    pub retries: usize,
    /// Distance threshold at the root.
    pub start_epsilon: f64,
    /// Shrink rate of the threshold per level.
    pub epsilon_multiplier: f64,
    /// Multiply the branching factor by 5 for the first `k` levels.
    pub break_first_levels: usize,
    /// Geometric mean centroids instead of representative points.
    pub geo_centroid: bool,
    /// Run the partitioning retries on the rayon pool.
    pub parallel: bool,
    /// Seed for the per-retry shuffles.
    pub seed: u64,
}

/// The hierarchical cluster index.
///
/// Owns every cluster of the run in one arena, indexed by [`ClusterId`].
/// Ids follow depth-first pre-order, so sibling ids grow monotonically with
/// child position and every descendant id is larger than its ancestor's.
#[derive(Debug)]
pub struct ClusterIndex {
    clusters: Vec<Cluster>,
    singletons: Vec<ClusterId>,
}

impl ClusterIndex {
    /// Build the index over `data`.
    ///
    /// `distances` must hold the metric's pairwise distances between all
    /// vectors; `dist_fn` is only consulted for geometric centroids.
    pub fn build(
        data: &[Vec<f64>],
        distances: &PairwiseMatrix,
        dist_fn: &(dyn Fn(&[f64], &[f64]) -> f64 + Sync),
        params: &IndexParams,
    ) -> Self {
        let n = data.len();
        let mut builder = Builder {
            clusters: Vec::with_capacity(2 * n),
            singletons: vec![ClusterId::MAX; n],
            data,
            distances,
            dist_fn,
            params,
        };

        let mut root = Cluster::new(0, 0, (0..n as u32).collect());
        root.finalize(data, distances, dist_fn, params.geo_centroid);
        let root_singleton = root.is_singleton();
        builder.clusters.push(root);
        if root_singleton {
            builder.singletons[0] = 0;
        } else {
            builder.split(0, params.start_epsilon);
        }

        debug_assert!(
            builder.singletons.iter().all(|&s| s != ClusterId::MAX),
            "every vector must end up in a singleton leaf"
        );
        log::debug!(
            "cluster index built: {} clusters over {} vectors",
            builder.clusters.len(),
            n
        );

        ClusterIndex {
            clusters: builder.clusters,
            singletons: builder.singletons,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Cluster {
        &self.clusters[0]
    }

    #[must_use]
    pub fn cluster(&self, id: ClusterId) -> &Cluster {
        &self.clusters[id as usize]
    }

    /// The singleton leaf holding `vector_id`.
    #[must_use]
    pub fn singleton(&self, vector_id: u32) -> &Cluster {
        &self.clusters[self.singletons[vector_id as usize] as usize]
    }

    /// Ids of all singleton leaves, by vector id.
    #[must_use]
    pub fn singleton_ids(&self) -> &[ClusterId] {
        &self.singletons
    }

    /// Total number of clusters in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of indexed vectors.
    #[must_use]
    pub fn num_vectors(&self) -> usize {
        self.singletons.len()
    }
}

struct Builder<'a> {
    clusters: Vec<Cluster>,
    singletons: Vec<ClusterId>,
    data: &'a [Vec<f64>],
    distances: &'a PairwiseMatrix,
    dist_fn: &'a (dyn Fn(&[f64], &[f64]) -> f64 + Sync),
    params: &'a IndexParams,
}

impl Builder<'_> {
    /// Recursively split `cluster_id`, assigning child ids in pre-order.
    fn split(&mut self, cluster_id: ClusterId, epsilon: f64) {
        let parent = &self.clusters[cluster_id as usize];
        let level = parent.level;
        let members = parent.members().to_vec();

        let mut desired = if epsilon <= 0.0 {
            members.len()
        } else {
            self.params.branching_factor
        };
        if (level as usize) < self.params.break_first_levels {
            desired *= 5;
        }

        let drafts = self.best_partition(cluster_id, &members, epsilon, desired);

        for draft in drafts {
            let id = self.clusters.len() as ClusterId;
            let mut child = Cluster::new(id, draft.centroid_idx, draft.members);
            child.level = level + 1;
            child.parent = Some(cluster_id);
            child.finalize(self.data, self.distances, self.dist_fn, self.params.geo_centroid);

            let singleton = child.is_singleton();
            let radius = child.radius();
            if singleton {
                self.singletons[child.vector_id() as usize] = id;
            }
            self.clusters.push(child);
            self.clusters[cluster_id as usize].children.push(id);

            // Depth maxLevels-2 onward gets threshold 0, which forces the
            // next split to emit only singletons.
            let next_epsilon = if (level as usize + 1) < self.params.max_levels.saturating_sub(2) {
                radius * self.params.epsilon_multiplier
            } else {
                0.0
            };
            if (level as usize + 1) < self.params.max_levels - 1 && !singleton {
                self.split(id, next_epsilon);
            }
        }
    }

    /// Run the partitioning `retries` times with different shuffles and keep
    /// the run with the lowest total compactness score.
    fn best_partition(
        &self,
        cluster_id: ClusterId,
        members: &[u32],
        epsilon: f64,
        max_clusters: usize,
    ) -> Vec<ClusterDraft> {
        let run = |retry: usize| {
            let salt = (cluster_id as u64) << 32 | retry as u64;
            let mut rng = StdRng::seed_from_u64(self.params.seed ^ salt);
            let mut points = members.to_vec();
            points.shuffle(&mut rng);
            let drafts = partition_max_clusters(&points, epsilon, max_clusters, self.distances);
            let score: f64 = drafts.iter().map(|d| d.score(self.distances)).sum();
            (score, drafts)
        };

        let mut runs: Vec<(f64, Vec<ClusterDraft>)> = if self.params.parallel {
            (0..self.params.retries).into_par_iter().map(run).collect()
        } else {
            (0..self.params.retries).map(run).collect()
        };

        // Lowest score wins; ties go to the earliest retry for determinism.
        let best = runs
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i)
            .expect("at least one clustering retry");
        runs.swap_remove(best).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vecmath;

    fn build_index(n: usize, seed: u64) -> ClusterIndex {
        let data: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let x = (i as f64 * 0.7).sin();
                let y = (i as f64 * 1.3).cos();
                vec![x, y]
            })
            .collect();
        let distances =
            PairwiseMatrix::build(n, false, |i, j| vecmath::euclidean(&data[i], &data[j]));
        let params = IndexParams {
            branching_factor: 4,
            max_levels: 8,
            retries: 5,
            start_epsilon: 1.0,
            epsilon_multiplier: 0.8,
            break_first_levels: 0,
            geo_centroid: false,
            parallel: false,
            seed,
        };
        ClusterIndex::build(&data, &distances, &vecmath::euclidean, &params)
    }

    #[test]
    fn ids_are_preorder_and_sibling_monotone() {
        let index = build_index(40, 1);
        for c in (0..index.len()).map(|i| index.cluster(i as ClusterId)) {
            for w in c.children.windows(2) {
                assert!(w[0] < w[1], "sibling ids must be monotone");
            }
            for &child in &c.children {
                assert!(child > c.id, "child id must exceed parent id");
                assert_eq!(index.cluster(child).parent, Some(c.id));
            }
        }
    }

    #[test]
    fn every_vector_has_a_singleton_leaf() {
        let index = build_index(40, 1);
        for v in 0..40 {
            let s = index.singleton(v);
            assert!(s.is_singleton());
            assert_eq!(s.vector_id(), v);
            assert_eq!(s.radius(), 0.0);
        }
    }

    #[test]
    fn radius_is_zero_iff_singleton() {
        let index = build_index(40, 2);
        // All points in the test data are distinct, so radius 0 and
        // singleton status coincide exactly.
        for c in (0..index.len()).map(|i| index.cluster(i as ClusterId)) {
            assert_eq!(c.radius() == 0.0, c.is_singleton());
        }
    }

    #[test]
    fn children_partition_the_parent() {
        let index = build_index(40, 3);
        for c in (0..index.len()).map(|i| index.cluster(i as ClusterId)) {
            if c.children.is_empty() {
                continue;
            }
            let mut child_members: Vec<u32> = c
                .children
                .iter()
                .flat_map(|&ch| index.cluster(ch).members().to_vec())
                .collect();
            child_members.sort_unstable();
            assert_eq!(child_members, c.members());
        }
    }

    #[test]
    fn build_is_deterministic_given_seed() {
        let a = build_index(30, 7);
        let b = build_index(30, 7);
        assert_eq!(a.len(), b.len());
        for i in 0..a.len() {
            let (ca, cb) = (a.cluster(i as ClusterId), b.cluster(i as ClusterId));
            assert_eq!(ca.members(), cb.members());
            assert_eq!(ca.children, cb.children);
        }
    }

    #[test]
    fn single_vector_dataset() {
        let data = vec![vec![1.0, 2.0]];
        let distances = PairwiseMatrix::zeros(1);
        let params = IndexParams {
            branching_factor: 4,
            max_levels: 8,
            retries: 3,
            start_epsilon: 1.0,
            epsilon_multiplier: 0.8,
            break_first_levels: 0,
            geo_centroid: false,
            parallel: false,
            seed: 0,
        };
        let index = ClusterIndex::build(&data, &distances, &vecmath::euclidean, &params);
        assert_eq!(index.len(), 1);
        assert!(index.root().is_singleton());
        assert_eq!(index.singleton(0).id, 0);
    }
}
