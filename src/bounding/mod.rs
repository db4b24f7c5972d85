//! Branch-and-bound machinery.
//!
//! The search walks a combinatorial space of candidate groupings. Each
//! candidate is a [`ClusterCombination`]; its similarity interval comes from
//! the metric's bound contract, and indecisive candidates are either
//! tightened cheaply by [`discount`] or split along the cluster tree by the
//! recursive driver in [`search`].

mod bounds;
mod combination;
pub mod discount;
mod factor;
pub mod search;

pub use bounds::ClusterBounds;
pub use combination::{symmetry_check_full, ClusterCombination, SideList};
pub use factor::{EmpiricalBoundFactor, PairExtrema};
pub use search::{RecursiveBounding, SearchState};
