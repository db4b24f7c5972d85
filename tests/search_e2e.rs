//! End-to-end searches cross-checked against brute-force enumeration.
//!
//! The searches run on deterministic synthetic datasets with planted
//! correlation structure. The driver mines every complexity level from the
//! minimal shape up to the configured maximum, so the brute-force reference
//! enumerates all of those shapes too. Thresholds are always placed in a
//! gap of the brute-force similarity distribution so floating point noise
//! cannot flip a result across the boundary.

use std::collections::HashSet;

use multicorr::metrics::{create_metric, SimilarityMetric};
use multicorr::{Detective, InMemoryProvider, MetricKind, RunConfig};

/// Deterministic dataset with planted groups of correlated vectors.
fn synthetic(n: usize, d: usize, groups: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            let g = i % groups;
            (0..d)
                .map(|t| {
                    let base = ((t as f64 + 3.0 * g as f64) * 0.37).sin();
                    let noise = ((i * 31 + t * 7) as f64 * 0.83).sin();
                    base + 0.35 * noise
                })
                .collect()
        })
        .collect()
}

type Grouping = (Vec<u32>, Vec<u32>);

fn canonical(mut lhs: Vec<u32>, mut rhs: Vec<u32>) -> Grouping {
    lhs.sort_unstable();
    rhs.sort_unstable();
    if lhs.len() == rhs.len() && lhs > rhs {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    }
}

/// Candidate groupings of one shape with their exact similarity; no
/// duplicates, no vector reuse.
fn enumerate_shape(n: u32, l: usize, r: usize) -> Vec<(Vec<u32>, Vec<u32>)> {
    let mut sides = Vec::new();
    match (l, r) {
        (1, 1) => {
            for a in 0..n {
                for b in a + 1..n {
                    sides.push((vec![a], vec![b]));
                }
            }
        }
        (1, 2) => {
            for a in 0..n {
                for b in 0..n {
                    for c in b + 1..n {
                        if a != b && a != c {
                            sides.push((vec![a], vec![b, c]));
                        }
                    }
                }
            }
        }
        (2, 0) => {
            for a in 0..n {
                for b in a + 1..n {
                    sides.push((vec![a, b], vec![]));
                }
            }
        }
        (3, 0) => {
            for a in 0..n {
                for b in a + 1..n {
                    for c in b + 1..n {
                        sides.push((vec![a, b, c], vec![]));
                    }
                }
            }
        }
        _ => panic!("unsupported brute-force shape ({l},{r})"),
    }
    sides
}

/// Brute force over every shape the driver mines, ranked strongest first.
fn brute_force(
    metric: &dyn SimilarityMetric,
    data: &[Vec<f64>],
    shapes: &[(usize, usize)],
) -> Vec<(Grouping, f64)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &(l, r) in shapes {
        for (lhs, rhs) in enumerate_shape(data.len() as u32, l, r) {
            let key = canonical(lhs.clone(), rhs.clone());
            if !seen.insert(key.clone()) {
                continue;
            }
            let xs: Vec<&[f64]> = lhs.iter().map(|&i| data[i as usize].as_slice()).collect();
            let ys: Vec<&[f64]> = rhs.iter().map(|&i| data[i as usize].as_slice()).collect();
            let sim = metric.combination_similarity(&xs, &ys);
            out.push((key, sim));
        }
    }
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    out
}

/// A threshold placed inside a clear gap of the similarity distribution,
/// as close to rank `preferred` as possible. Returns the threshold and the
/// number of groupings above it, so floating point noise can never flip a
/// result across the boundary.
fn gap_threshold(ranked: &[(Grouping, f64)], preferred: usize) -> (f64, usize) {
    for offset in 0..ranked.len() {
        for k in [preferred.saturating_sub(offset), preferred + offset] {
            if k == 0 || k >= ranked.len() {
                continue;
            }
            let hi = ranked[k - 1].1;
            let lo = ranked[k].1;
            if hi - lo > 1e-6 {
                return ((hi + lo) / 2.0, k);
            }
        }
    }
    panic!("no usable similarity gap in the brute-force distribution");
}

fn preprocessed(metric: &dyn SimilarityMetric, raw: &[Vec<f64>]) -> Vec<Vec<f64>> {
    raw.iter().map(|v| metric.preprocess(v)).collect()
}

fn accepted_set(results: &[multicorr::ResultTuple]) -> HashSet<Grouping> {
    results.iter().map(|t| t.canonical_ids()).collect()
}

#[test]
fn pearson_threshold_query_matches_brute_force() {
    let raw = synthetic(28, 40, 4);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    let (tau, k) = gap_threshold(&ranked, 25);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(tau)
        .with_seed(7);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
    for r in &outcome.results {
        assert!(r.similarity >= tau, "{r:?} under threshold");
    }
}

#[test]
fn pearson_search_accepts_no_duplicate_groupings() {
    let raw = synthetic(24, 32, 3);
    let config = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(0.5)
        .with_seed(3);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert!(!outcome.results.is_empty());
    let mut seen = HashSet::new();
    for r in &outcome.results {
        assert!(
            seen.insert(r.canonical_ids()),
            "duplicate grouping {:?} | {:?}",
            r.lhs,
            r.rhs
        );
    }
}

#[test]
fn pearson_top_k_matches_brute_force_and_final_threshold() {
    let raw = synthetic(28, 40, 4);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    // A k whose boundary sits in a clear similarity gap, so the top k is
    // uniquely determined.
    let (_, k) = gap_threshold(&ranked, 10);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_top_k_query(k, 0.0)
        .with_seed(7);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(outcome.results.len(), k);
    assert_eq!(accepted_set(&outcome.results), expected);

    // The final running threshold equals the weakest accepted similarity.
    let weakest = outcome
        .results
        .iter()
        .map(|r| r.similarity)
        .fold(f64::MAX, f64::min);
    assert!((outcome.final_threshold - weakest).abs() < 1e-12);
}

#[test]
fn euclidean_threshold_query_matches_brute_force() {
    let raw = synthetic(24, 32, 4);
    let metric = create_metric(MetricKind::Euclidean);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    let (tau, k) = gap_threshold(&ranked, 15);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Euclidean, 1, 2)
        .with_threshold_query(tau)
        .with_seed(11);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn spearman_threshold_query_matches_brute_force() {
    let raw = synthetic(20, 36, 4);
    let metric = create_metric(MetricKind::Spearman);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1)]);
    let (tau, k) = gap_threshold(&ranked, 12);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Spearman, 1, 1)
        .with_threshold_query(tau)
        .with_seed(2);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn multipole_one_sided_matches_brute_force() {
    let raw = synthetic(16, 28, 3);
    let metric = create_metric(MetricKind::Multipole);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(2, 0), (3, 0)]);
    let (tau, k) = gap_threshold(&ranked, 8);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Multipole, 3, 0)
        .with_threshold_query(tau)
        .with_seed(13);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn total_correlation_pairs_match_brute_force() {
    let raw = synthetic(18, 64, 3);
    let metric = create_metric(MetricKind::TotalCorrelation);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(2, 0)]);
    let (tau, k) = gap_threshold(&ranked, 10);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::TotalCorrelation, 2, 0)
        .with_threshold_query(tau)
        .with_seed(5);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn progressive_query_stops_at_exactly_k() {
    let raw = synthetic(24, 32, 3);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);
    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    // Plenty of qualifying groupings above the threshold.
    let (tau, qualifying) = gap_threshold(&ranked, 30);
    assert!(qualifying >= 5);

    let config = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_progressive_query(tau, 5)
        .with_seed(19);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(outcome.results.len(), 5);
    for r in &outcome.results {
        assert!(r.similarity >= tau);
    }
}

#[test]
fn discounting_changes_nothing_about_the_result_set() {
    let raw = synthetic(26, 36, 4);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);
    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    let (tau, _) = gap_threshold(&ranked, 20);

    let base = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(tau)
        .with_seed(23);
    let plain = Detective::new(base.clone())
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw.clone()))
        .unwrap();
    let discounted = Detective::new(base.with_discounting(0.3, 8, 1))
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(
        accepted_set(&plain.results),
        accepted_set(&discounted.results)
    );
}

#[test]
fn min_jump_rejects_patterns_explained_by_subsets() {
    let raw = synthetic(20, 32, 4);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    let (tau, _) = gap_threshold(&ranked, 20);
    let min_jump = 0.05;

    // Pairs pass unconditionally (the policy applies to patterns larger
    // than two); a triple {a} | {b, c} must beat its best sub-pattern
    // ({a} | {b} or {a} | {c}) by the margin.
    let expected: HashSet<Grouping> = ranked
        .iter()
        .filter(|((lhs, rhs), sim)| {
            if *sim < tau {
                return false;
            }
            if lhs.len() + rhs.len() == 2 {
                return true;
            }
            let a = lhs[0] as usize;
            let (b, c) = (rhs[0] as usize, rhs[1] as usize);
            let best_subset = metric
                .combination_similarity(&[&data[a]], &[&data[b]])
                .max(metric.combination_similarity(&[&data[a]], &[&data[c]]));
            *sim >= best_subset + min_jump
        })
        .map(|(g, _)| g.clone())
        .collect();

    let config = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(tau)
        .with_min_jump(min_jump)
        .with_seed(29);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let raw = synthetic(22, 32, 4);
    let base = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(0.55)
        .with_seed(31);

    let parallel = Detective::new(base.clone())
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw.clone()))
        .unwrap();
    let sequential = Detective::new(base.sequential())
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(
        accepted_set(&parallel.results),
        accepted_set(&sequential.results)
    );
}

#[test]
fn theoretical_bounding_matches_empirical_results() {
    let raw = synthetic(20, 32, 4);
    let metric = create_metric(MetricKind::Pearson);
    let data = preprocessed(metric.as_ref(), &raw);
    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1), (1, 2)]);
    let (tau, _) = gap_threshold(&ranked, 15);

    let mut empirical_cfg = RunConfig::new(MetricKind::Pearson, 1, 2)
        .with_threshold_query(tau)
        .with_seed(37);
    let mut theoretical_cfg = empirical_cfg.clone();
    empirical_cfg.empirical_bounding = true;
    theoretical_cfg.empirical_bounding = false;

    let empirical = Detective::new(empirical_cfg)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw.clone()))
        .unwrap();
    let theoretical = Detective::new(theoretical_cfg)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(
        accepted_set(&empirical.results),
        accepted_set(&theoretical.results)
    );
}

#[test]
fn manhattan_threshold_query_matches_brute_force() {
    let raw = synthetic(18, 24, 3);
    let metric = create_metric(MetricKind::Manhattan);
    let data = preprocessed(metric.as_ref(), &raw);

    let ranked = brute_force(metric.as_ref(), &data, &[(1, 1)]);
    let (tau, k) = gap_threshold(&ranked, 8);
    let expected: HashSet<Grouping> = ranked[..k].iter().map(|(g, _)| g.clone()).collect();

    let config = RunConfig::new(MetricKind::Manhattan, 1, 1)
        .with_threshold_query(tau)
        .with_seed(41);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    assert_eq!(accepted_set(&outcome.results), expected);
}

#[test]
fn result_tuples_serialize_round_trip() {
    let raw = synthetic(16, 24, 3);
    let config = RunConfig::new(MetricKind::Pearson, 1, 1)
        .with_threshold_query(0.6)
        .with_seed(43);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();

    let json = serde_json::to_string(&outcome.results).unwrap();
    let back: Vec<multicorr::ResultTuple> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.len(), outcome.results.len());
    for (a, b) in outcome.results.iter().zip(&back) {
        assert_eq!(a.canonical_ids(), b.canonical_ids());
        assert_eq!(a.similarity, b.similarity);
    }
}

#[test]
fn empty_result_set_is_a_successful_run() {
    let raw = synthetic(12, 24, 4);
    // No pair of distinct vectors is perfectly correlated.
    let config = RunConfig::new(MetricKind::Pearson, 1, 1)
        .with_threshold_query(0.999_999)
        .with_seed(47);
    let outcome = Detective::new(config)
        .unwrap()
        .run(&InMemoryProvider::from_rows(raw))
        .unwrap();
    assert!(outcome.results.is_empty());
}
