//! multicorr: branch-and-bound search for multivariate correlation patterns.
//!
//! Given n numeric vectors and a similarity measure, find every grouping of
//! up to P vectors per side whose aggregated similarity clears a threshold,
//! or the top-k strongest groupings, or the first k that qualify. Exhaustive
//! evaluation is `O(n^P)` and infeasible beyond toy sizes; the engine prunes
//! whole candidate subtrees using cheap similarity bounds derived from a
//! hierarchical clustering of the vectors.
//!
//! # How the search works
//!
//! 1. **Cluster index**: the vectors are clustered top-down into a tree of
//!    nested groups, each with a centroid and covering radius.
//! 2. **Bounding**: a candidate grouping of *clusters* stands for every
//!    grouping of member vectors. The metric brackets the similarity of all
//!    of them at once, from cluster geometry (triangle inequality) or from
//!    cached pairwise extrema.
//! 3. **Branch and bound**: candidates whose bound clears the running
//!    threshold are accepted wholesale, candidates whose bound cannot reach
//!    it are discarded wholesale, and the rest are split along the cluster
//!    tree and re-assessed, in parallel, until all leaves are singletons.
//! 4. **Discounting** (optional): before splitting, an indecisive bound can
//!    often be tightened by cutting the few extreme pairs holding it up,
//!    which are re-searched separately.
//!
//! # Similarity metrics
//!
//! | Metric | Sides | Bounds |
//! |--------|-------|--------|
//! | Pearson correlation | two | empirical or geometric |
//! | Spearman correlation | two | empirical or geometric |
//! | Euclidean similarity | two | empirical or geometric |
//! | Manhattan similarity | two | geometric only |
//! | Multipole | one | empirical or geometric |
//! | Total correlation | one | empirical |
//!
//! All metrics satisfy one soundness contract: for every concrete choice of
//! member vectors, the true similarity lies inside the returned interval,
//! and the interval collapses to a point at singleton granularity.
//!
//! # Example
//!
//! ```no_run
//! use multicorr::{Detective, InMemoryProvider, MetricKind, RunConfig};
//!
//! let rows: Vec<Vec<f64>> = (0..64)
//!     .map(|i| (0..128).map(|t| ((i + t) as f64 * 0.1).sin()).collect())
//!     .collect();
//! let provider = InMemoryProvider::from_rows(rows);
//!
//! let config = RunConfig::new(MetricKind::Pearson, 1, 2)
//!     .with_top_k_query(10, 0.5)
//!     .with_seed(42);
//! let outcome = Detective::new(config)?.run(&provider)?;
//! assert!(outcome.results.len() <= 10);
//! # Ok::<(), multicorr::DetectiveError>(())
//! ```

pub mod bounding;
pub mod clustering;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queries;
pub mod stats;
pub mod vecmath;

pub use config::{MetricKind, QueryDiscipline, RunConfig};
pub use dataset::{CsvFileProvider, Dataset, DatasetProvider, InMemoryProvider};
pub use engine::{Detective, SearchOutcome};
pub use error::{DetectiveError, Result};
pub use queries::ResultTuple;
