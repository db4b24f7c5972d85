//! Thread-safe result aggregation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::threshold::RunningThreshold;
use crate::bounding::ClusterCombination;
use crate::clustering::ClusterIndex;
use crate::config::QueryDiscipline;

/// Memory cap for unbounded threshold queries; oldest results are pruned
/// first once it is reached.
pub const MAX_RESULTS: usize = 1_000_000;

/// An accepted pattern while the search is running.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub lhs: SmallVec<[u32; 4]>,
    pub rhs: SmallVec<[u32; 4]>,
    pub similarity: f64,
    pub timestamp: u64,
}

impl ResultEntry {
    /// Convert an accepted singleton-leaf combination into an entry.
    #[must_use]
    pub fn from_combination(cc: &ClusterCombination, index: &ClusterIndex) -> Self {
        let side = |ids: &[crate::clustering::ClusterId]| {
            ids.iter()
                .map(|&id| index.cluster(id).vector_id())
                .collect()
        };
        let bounds = cc.expect_bounds();
        Self {
            lhs: side(cc.lhs()),
            rhs: side(cc.rhs()),
            similarity: bounds.lower,
            timestamp: bounds.timestamp,
        }
    }
}

/// A finalized result delivered to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTuple {
    /// Left-side vector ids, ascending.
    pub lhs: Vec<u32>,
    /// Right-side vector ids, ascending.
    pub rhs: Vec<u32>,
    /// Left-side vector labels, aligned with `lhs`.
    pub lhs_headers: Vec<String>,
    /// Right-side vector labels, aligned with `rhs`.
    pub rhs_headers: Vec<String>,
    pub similarity: f64,
    /// Acceptance time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ResultTuple {
    /// Canonical unordered form: each side sorted, equal-cardinality sides
    /// ordered by their smallest element. Two tuples describe the same
    /// grouping iff their canonical forms are equal.
    #[must_use]
    pub fn canonical_ids(&self) -> (Vec<u32>, Vec<u32>) {
        let (l, r) = (self.lhs.clone(), self.rhs.clone());
        if l.len() == r.len() && l > r {
            (r, l)
        } else {
            (l, r)
        }
    }
}

#[derive(Debug)]
enum Store {
    /// Min-heap on similarity: the weakest accepted result sits on top.
    Heap(BinaryHeap<Reverse<HeapEntry>>),
    /// Insertion-ordered accumulation.
    List(VecDeque<ResultEntry>),
}

#[derive(Debug)]
struct HeapEntry(ResultEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.similarity == other.0.similarity
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.similarity.total_cmp(&other.0.similarity)
    }
}

/// The sink all accepted patterns flow into.
///
/// One of three disciplines, chosen at construction. Insertions and
/// evictions run under a single critical section; the running threshold is
/// raised from inside it so the search prunes against the newest value.
#[derive(Debug)]
pub struct ResultSet {
    discipline: QueryDiscipline,
    top_k: usize,
    threshold: Arc<RunningThreshold>,
    store: Mutex<Store>,
    stopped: AtomicBool,
}

impl ResultSet {
    #[must_use]
    pub fn new(discipline: QueryDiscipline, top_k: usize, threshold: Arc<RunningThreshold>) -> Self {
        let store = match discipline {
            QueryDiscipline::TopK => Store::Heap(BinaryHeap::with_capacity(top_k + 1)),
            _ => Store::List(VecDeque::new()),
        };
        Self {
            discipline,
            top_k,
            threshold,
            store: Mutex::new(store),
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> &Arc<RunningThreshold> {
        &self.threshold
    }

    /// Whether the progressive-stop signal fired. This is an expected
    /// completion path, not an error; outstanding tasks drain cooperatively.
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Accept a batch of decided-positive entries.
    pub fn add_all(&self, entries: Vec<ResultEntry>) {
        match self.discipline {
            QueryDiscipline::TopK => {
                let mut store = self.store.lock();
                let Store::Heap(heap) = &mut *store else {
                    unreachable!("top-k results use the heap store")
                };
                for entry in entries {
                    if entry.similarity > self.threshold.get() {
                        heap.push(Reverse(HeapEntry(entry)));
                        if heap.len() > self.top_k {
                            heap.pop();
                            if let Some(Reverse(weakest)) = heap.peek() {
                                self.threshold.raise(weakest.0.similarity);
                            }
                        }
                    }
                }
            }
            QueryDiscipline::Progressive => {
                let mut store = self.store.lock();
                let Store::List(list) = &mut *store else {
                    unreachable!("progressive results use the list store")
                };
                if self.stopped.load(Ordering::Relaxed) {
                    return;
                }
                let room = self.top_k.saturating_sub(list.len());
                if entries.len() > room {
                    list.extend(entries.into_iter().take(room));
                    self.stopped.store(true, Ordering::Relaxed);
                    log::info!("progressive stop: {} results reached", self.top_k);
                } else {
                    list.extend(entries);
                }
            }
            QueryDiscipline::Threshold => {
                let mut store = self.store.lock();
                let Store::List(list) = &mut *store else {
                    unreachable!("threshold results use the list store")
                };
                while list.len() + entries.len() > MAX_RESULTS {
                    list.pop_front();
                }
                list.extend(entries);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &*self.store.lock() {
            Store::Heap(h) => h.len(),
            Store::List(l) => l.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries, used by the top-k expansion pass.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResultEntry> {
        match &*self.store.lock() {
            Store::Heap(h) => h.iter().map(|Reverse(e)| e.0.clone()).collect(),
            Store::List(l) => l.iter().cloned().collect(),
        }
    }

    /// Replace the current entries, keeping the raised threshold. The top-k
    /// expansion pass restores the pre-expansion set through this to avoid
    /// duplicating its results at the next complexity level.
    pub fn restore(&self, entries: Vec<ResultEntry>) {
        let mut store = self.store.lock();
        match &mut *store {
            Store::Heap(h) => {
                h.clear();
                h.extend(entries.into_iter().map(|e| Reverse(HeapEntry(e))));
            }
            Store::List(l) => {
                l.clear();
                l.extend(entries);
            }
        }
    }

    /// Close the sink: label entries and sort them strongest first.
    #[must_use]
    pub fn into_tuples(self, headers: &[String]) -> Vec<ResultTuple> {
        let entries = self.snapshot();
        let mut tuples: Vec<ResultTuple> = entries
            .into_iter()
            .map(|mut e| {
                e.lhs.sort_unstable();
                e.rhs.sort_unstable();
                ResultTuple {
                    lhs_headers: e.lhs.iter().map(|&i| headers[i as usize].clone()).collect(),
                    rhs_headers: e.rhs.iter().map(|&i| headers[i as usize].clone()).collect(),
                    lhs: e.lhs.into_vec(),
                    rhs: e.rhs.into_vec(),
                    similarity: e.similarity,
                    timestamp: e.timestamp,
                }
            })
            .collect();
        tuples.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        tuples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn entry(l: u32, r: u32, sim: f64) -> ResultEntry {
        ResultEntry {
            lhs: smallvec![l],
            rhs: smallvec![r],
            similarity: sim,
            timestamp: 0,
        }
    }

    #[test]
    fn top_k_keeps_strongest_and_raises_threshold() {
        let threshold = Arc::new(RunningThreshold::new(0.0));
        let rs = ResultSet::new(QueryDiscipline::TopK, 2, threshold.clone());
        rs.add_all(vec![entry(0, 1, 0.3), entry(0, 2, 0.8), entry(0, 3, 0.5)]);
        assert_eq!(rs.len(), 2);
        // Weakest kept result becomes the new threshold.
        assert_eq!(threshold.get(), 0.5);

        // Below-threshold entries are ignored.
        rs.add_all(vec![entry(0, 4, 0.4)]);
        assert_eq!(rs.len(), 2);

        rs.add_all(vec![entry(0, 5, 0.9)]);
        assert_eq!(threshold.get(), 0.8);
        let sims: Vec<f64> = rs.snapshot().iter().map(|e| e.similarity).collect();
        assert!(sims.contains(&0.8) && sims.contains(&0.9));
    }

    #[test]
    fn progressive_stops_at_k_without_overshooting() {
        let threshold = Arc::new(RunningThreshold::new(0.6));
        let rs = ResultSet::new(QueryDiscipline::Progressive, 3, threshold);
        rs.add_all(vec![entry(0, 1, 0.7), entry(0, 2, 0.7)]);
        assert!(!rs.stopped());
        rs.add_all(vec![entry(0, 3, 0.7), entry(0, 4, 0.7)]);
        assert!(rs.stopped());
        assert_eq!(rs.len(), 3);

        // Late arrivals from draining tasks are dropped.
        rs.add_all(vec![entry(0, 5, 0.7)]);
        assert_eq!(rs.len(), 3);
    }

    #[test]
    fn threshold_discipline_accumulates_in_order() {
        let threshold = Arc::new(RunningThreshold::new(0.6));
        let rs = ResultSet::new(QueryDiscipline::Threshold, 0, threshold);
        rs.add_all(vec![entry(0, 1, 0.7)]);
        rs.add_all(vec![entry(0, 2, 0.9)]);
        assert_eq!(rs.len(), 2);
        let tuples = rs.into_tuples(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(tuples[0].similarity, 0.9);
        assert_eq!(tuples[0].rhs_headers, vec!["c"]);
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let threshold = Arc::new(RunningThreshold::new(0.0));
        let rs = ResultSet::new(QueryDiscipline::TopK, 5, threshold);
        rs.add_all(vec![entry(0, 1, 0.5), entry(0, 2, 0.6)]);
        let snap = rs.snapshot();
        rs.add_all(vec![entry(0, 3, 0.7)]);
        assert_eq!(rs.len(), 3);
        rs.restore(snap);
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn canonical_ids_collapse_mirrored_tuples() {
        let t1 = ResultTuple {
            lhs: vec![3],
            rhs: vec![7],
            lhs_headers: vec![],
            rhs_headers: vec![],
            similarity: 0.9,
            timestamp: 0,
        };
        let mut t2 = t1.clone();
        std::mem::swap(&mut t2.lhs, &mut t2.rhs);
        assert_eq!(t1.canonical_ids(), t2.canonical_ids());
    }
}
