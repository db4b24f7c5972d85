//! The shared running threshold.

use std::sync::atomic::{AtomicU64, Ordering};

/// The current minimum similarity required for acceptance.
///
/// Monotonically non-decreasing over a run. Reads are lock-free; writes go
/// through a compare-and-swap loop that only ever raises the value. A reader
/// may observe a stale (lower) threshold, which merely makes pruning
/// conservative, never unsound.
#[derive(Debug)]
pub struct RunningThreshold {
    bits: AtomicU64,
}

impl RunningThreshold {
    #[must_use]
    pub fn new(initial: f64) -> Self {
        Self {
            bits: AtomicU64::new(initial.to_bits()),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Raise the threshold to `value` if it is currently lower.
    /// Returns whether the stored value changed.
    pub fn raise(&self, value: f64) -> bool {
        self.bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                if value > f64::from_bits(bits) {
                    Some(value.to_bits())
                } else {
                    None
                }
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn raise_is_monotone() {
        let t = RunningThreshold::new(0.5);
        assert!(t.raise(0.7));
        assert!(!t.raise(0.6));
        assert_eq!(t.get(), 0.7);
        assert!(t.raise(0.9));
        assert_eq!(t.get(), 0.9);
    }

    #[test]
    fn negative_initial_values_work() {
        let t = RunningThreshold::new(-1.0);
        assert!(t.raise(-0.25));
        assert_eq!(t.get(), -0.25);
    }

    #[test]
    fn concurrent_raises_keep_the_maximum() {
        let t = Arc::new(RunningThreshold::new(0.0));
        let handles: Vec<_> = (0..8)
            .map(|k| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        t.raise((k * 1000 + i) as f64 / 8000.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.get(), 7999.0 / 8000.0);
    }
}
