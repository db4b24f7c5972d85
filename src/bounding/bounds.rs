//! Similarity intervals.

use std::time::{SystemTime, UNIX_EPOCH};

/// A provably valid similarity interval for a candidate combination.
///
/// Invariant: `lower <= upper` at all times. Updates only ever narrow the
/// interval; a bound can tighten as the search descends, never widen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterBounds {
    pub lower: f64,
    pub upper: f64,
    /// Highest lower bound observed for any sub-pattern, used by the
    /// min-jump and irreducibility policies.
    pub max_lower_subset: f64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ClusterBounds {
    #[must_use]
    pub fn new(lower: f64, upper: f64, max_lower_subset: f64) -> Self {
        debug_assert!(
            lower <= upper + 1e-9,
            "bounds out of order: [{lower}, {upper}]"
        );
        Self {
            lower,
            upper,
            max_lower_subset,
            timestamp: epoch_millis(),
        }
    }

    /// Midpoint of the interval.
    #[must_use]
    pub fn center(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Interval width.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Narrow this interval with `other`: max of lowers, min of uppers.
    /// Monotone by construction.
    pub fn update(&mut self, other: &ClusterBounds) {
        self.lower = self.lower.max(other.lower);
        self.upper = self.upper.min(other.upper);
        self.max_lower_subset = self.max_lower_subset.max(other.max_lower_subset);
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_narrows_never_widens() {
        let mut b = ClusterBounds::new(-0.5, 0.9, 0.1);
        b.update(&ClusterBounds::new(-0.2, 1.0, 0.0));
        assert_eq!(b.lower, -0.2);
        assert_eq!(b.upper, 0.9);
        assert_eq!(b.max_lower_subset, 0.1);

        // A looser interval changes nothing.
        b.update(&ClusterBounds::new(-1.0, 2.0, 0.05));
        assert_eq!(b.lower, -0.2);
        assert_eq!(b.upper, 0.9);
    }

    #[test]
    fn center_is_midpoint() {
        let b = ClusterBounds::new(0.0, 1.0, 0.0);
        assert_eq!(b.center(), 0.5);
        assert_eq!(b.width(), 1.0);
    }
}
