//! Hierarchical cluster index.
//!
//! A top-down clustering of the input vectors into a tree of nested groups.
//! Each node carries a centroid and a covering radius, which is all the
//! bounding machinery needs: any point of a cluster lies within `radius` of
//! the centroid, so pairwise cluster distances can be bracketed with the
//! triangle inequality. Leaves are singleton clusters addressable by the
//! original vector id.

mod cluster;
mod index;
mod partition;

pub use cluster::{Cluster, ClusterId};
pub use index::{ClusterIndex, IndexParams};
