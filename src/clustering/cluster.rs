//! Cluster tree nodes.

use crate::vecmath::{self, PairwiseMatrix};

/// Index of a cluster in the owning [`super::ClusterIndex`] arena.
///
/// Ids are assigned depth-first pre-order, so within any sibling group ids
/// grow monotonically with child position. The candidate enumeration relies
/// on this ordering for its anti-symmetry checks.
pub type ClusterId = u32;

/// A node in the cluster tree.
///
/// Created with its member set, finalized exactly once (geometry computed),
/// then immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub level: u32,
    pub parent: Option<ClusterId>,
    pub children: Vec<ClusterId>,

    members: Vec<u32>,
    centroid_idx: Option<u32>,
    centroid: Vec<f64>,
    radius: f64,
    member_dists: Vec<f64>,
    finalized: bool,
}

impl Cluster {
    pub(crate) fn new(id: ClusterId, centroid_idx: u32, mut members: Vec<u32>) -> Self {
        members.sort_unstable();
        Self {
            id,
            level: 0,
            parent: None,
            children: Vec::new(),
            members,
            centroid_idx: Some(centroid_idx),
            centroid: Vec::new(),
            radius: 0.0,
            member_dists: Vec::new(),
            finalized: false,
        }
    }

    /// Compute centroid, per-member distances and covering radius.
    ///
    /// Panics if called twice; membership and geometry are immutable after
    /// finalization.
    pub(crate) fn finalize(
        &mut self,
        data: &[Vec<f64>],
        distances: &PairwiseMatrix,
        dist_fn: &(dyn Fn(&[f64], &[f64]) -> f64 + Sync),
        geo_centroid: bool,
    ) {
        assert!(!self.finalized, "cluster {} finalized twice", self.id);
        self.finalized = true;

        if geo_centroid {
            let rows: Vec<&[f64]> = self.members.iter().map(|&m| data[m as usize].as_slice()).collect();
            let sum = vecmath::aggregate(&rows);
            let n = self.members.len() as f64;
            self.centroid = sum.into_iter().map(|x| x / n).collect();
            self.centroid_idx = None;
        } else {
            let idx = self.centroid_idx.expect("point centroid without index");
            self.centroid = data[idx as usize].clone();
        }

        if self.members.len() == 1 {
            // Avoid floating point noise: a singleton has radius 0 by definition.
            self.member_dists = vec![0.0];
            self.radius = 0.0;
            return;
        }

        self.member_dists = self
            .members
            .iter()
            .map(|&m| match self.centroid_idx {
                Some(c) => distances.get(m as usize, c as usize),
                None => dist_fn(&data[m as usize], &self.centroid),
            })
            .collect();
        self.radius = self.member_dists.iter().fold(0.0, |a, &d| a.max(d));
    }

    /// Sorted member vector ids.
    #[must_use]
    pub fn members(&self) -> &[u32] {
        &self.members
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// The vector id of a singleton cluster.
    #[must_use]
    pub fn vector_id(&self) -> u32 {
        debug_assert!(self.is_singleton());
        self.members[0]
    }

    #[must_use]
    pub fn contains(&self, vector_id: u32) -> bool {
        debug_assert!(self.finalized, "contains() on a non-finalized cluster");
        self.members.binary_search(&vector_id).is_ok()
    }

    #[must_use]
    pub fn centroid(&self) -> &[f64] {
        debug_assert!(self.finalized);
        &self.centroid
    }

    /// Representative data point id, `None` for geometric centroids.
    #[must_use]
    pub fn centroid_idx(&self) -> Option<u32> {
        self.centroid_idx
    }

    /// Covering radius: max distance from the centroid to any member.
    /// Zero iff the cluster is a singleton.
    #[must_use]
    pub fn radius(&self) -> f64 {
        debug_assert!(self.finalized);
        self.radius
    }

    /// Cached distance from `vector_id` to the centroid.
    #[must_use]
    pub fn distance_to_centroid(&self, vector_id: u32) -> f64 {
        let i = self
            .members
            .binary_search(&vector_id)
            .expect("vector is not a member of this cluster");
        self.member_dists[i]
    }

    /// Intra-cluster compactness score, lower is tighter.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.radius / self.members.len() as f64
    }
}
