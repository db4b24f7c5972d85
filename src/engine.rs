//! Top-level search driver.
//!
//! Runs the staged pipeline: pairwise distances over the preprocessed data,
//! hierarchical clustering, then the recursive bounding search. Stage
//! durations land in the statistics bag.

use std::sync::Arc;

use crate::bounding::{RecursiveBounding, SearchState};
use crate::clustering::{ClusterIndex, IndexParams};
use crate::config::RunConfig;
use crate::dataset::DatasetProvider;
use crate::error::Result;
use crate::metrics::{create_metric, BoundCache};
use crate::queries::{ResultSet, ResultTuple, RunningThreshold};
use crate::stats::StatBag;

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Accepted patterns, strongest first.
    pub results: Vec<ResultTuple>,
    /// Final value of the running threshold. For top-k queries this equals
    /// the similarity of the weakest accepted result.
    pub final_threshold: f64,
    /// Counters and stage durations.
    pub stats: StatBag,
}

/// The multivariate correlation pattern search engine.
///
/// ```no_run
/// use multicorr::{Detective, InMemoryProvider, MetricKind, RunConfig};
///
/// let config = RunConfig::new(MetricKind::Pearson, 1, 2).with_threshold_query(0.9);
/// let provider = InMemoryProvider::from_rows(vec![vec![0.0, 1.0, 2.0]; 8]);
/// let outcome = Detective::new(config)?.run(&provider)?;
/// for r in &outcome.results {
///     println!("{:?} | {:?} -> {:.3}", r.lhs, r.rhs, r.similarity);
/// }
/// # Ok::<(), multicorr::DetectiveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Detective {
    config: RunConfig,
}

impl Detective {
    /// Validate the configuration eagerly; no partial runs.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute the full search over the provider's dataset.
    pub fn run(&self, provider: &dyn DatasetProvider) -> Result<SearchOutcome> {
        let config = &self.config;
        let stats = StatBag::new();

        let dataset = provider.load()?;
        let metric = create_metric(config.metric);
        log::info!(
            "searching {} vectors ({} dims) with {:?}, pattern up to ({},{})",
            dataset.len(),
            dataset.dimensions(),
            config.metric,
            config.max_p_left,
            config.max_p_right,
        );

        let data: Vec<Vec<f64>> = dataset.matrix.iter().map(|v| metric.preprocess(v)).collect();

        let distances = stats.stage("pairwise-distances", || {
            metric.compute_pairwise_distances(&data, config.parallel)
        });

        let index_params = IndexParams {
            branching_factor: config.resolved_branching_factor(),
            max_levels: config.max_levels,
            retries: config.clustering_retries,
            start_epsilon: metric.sim_to_dist(0.81 * metric.max_similarity()),
            epsilon_multiplier: config.epsilon_multiplier,
            break_first_levels: config.break_first_levels,
            geo_centroid: config.geo_centroid,
            parallel: config.parallel,
            seed: config.seed,
        };
        let index = stats.stage("hierarchical-clustering", || {
            ClusterIndex::build(&data, &distances, &|a, b| metric.distance(a, b), &index_params)
        });

        let threshold = Arc::new(RunningThreshold::new(config.tau));
        let results = ResultSet::new(config.query, config.top_k, threshold.clone());
        let cache = BoundCache::new();

        let state = SearchState::new(
            config,
            metric.as_ref(),
            &index,
            &data,
            &distances,
            &cache,
            &stats,
            &results,
        );
        let search = RecursiveBounding::new(state)?;
        stats.stage("recursive-bounding", || search.run())?;

        let final_threshold = threshold.get();
        log::info!(
            "search finished: {} results, final threshold {final_threshold:.6}, {} cached pairs",
            results.len(),
            cache.pair_count(),
        );

        Ok(SearchOutcome {
            results: results.into_tuples(&dataset.headers),
            final_threshold,
            stats,
        })
    }
}
