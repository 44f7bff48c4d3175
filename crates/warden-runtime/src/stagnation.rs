//! [`StagnationTracker`] – sustained-lack-of-progress detector.
//!
//! The run loop can be executing approved actions every tick and still get
//! nowhere: a denied-then-retried oscillation, a simulator that refuses to
//! move, a goal behind an unmapped wall. The tracker watches the distance to
//! goal across **executed** ticks and flags when it has barely moved for a
//! whole window, so a human can intervene; the loop itself keeps running.
//!
//! # Algorithm
//!
//! Each executed tick reports the current goal distance. While the distance
//! stays above `min_dist`, a tick that reduces it by less than `eps`
//! increments the stagnant counter; a tick with real progress resets it.
//! Reaching `cycles` consecutive stagnant ticks trips the detector once and
//! resets the counter.
//!
//! # Example
//!
//! ```rust
//! use warden_runtime::stagnation::{StagnationConfig, StagnationTracker};
//!
//! let mut tracker = StagnationTracker::new(StagnationConfig {
//!     cycles: 3,
//!     ..StagnationConfig::default()
//! });
//! tracker.record(5.0); // primes the baseline
//! assert!(!tracker.record(5.0));
//! assert!(!tracker.record(5.0));
//! assert!(tracker.record(5.0)); // third stagnant tick trips it
//! assert!(!tracker.record(5.0)); // counter was reset
//! ```

/// Thresholds for the detector.
#[derive(Debug, Clone, Copy)]
pub struct StagnationConfig {
    /// Progress below this (metres per tick) counts as stagnant.
    pub eps: f64,
    /// No stagnation accounting this close to the goal.
    pub min_dist: f64,
    /// Consecutive stagnant ticks that trip the detector.
    pub cycles: u32,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            eps: 0.02,
            min_dist: 0.4,
            cycles: 30,
        }
    }
}

/// Windowed progress tracker. Feed it the goal distance of every executed
/// tick; it returns `true` exactly when the stagnation threshold is crossed.
pub struct StagnationTracker {
    config: StagnationConfig,
    prev_distance: Option<f64>,
    stagnant_cycles: u32,
}

impl StagnationTracker {
    pub fn new(config: StagnationConfig) -> Self {
        Self {
            config,
            prev_distance: None,
            stagnant_cycles: 0,
        }
    }

    /// Record the goal distance after an executed tick.
    ///
    /// Returns `true` when stagnation has just been detected; the counter
    /// resets so the alert fires once per stagnation episode.
    pub fn record(&mut self, distance: f64) -> bool {
        let tripped = match self.prev_distance {
            Some(prev) => {
                let progress = prev - distance;
                if progress >= self.config.eps {
                    self.stagnant_cycles = 0;
                } else if distance > self.config.min_dist {
                    self.stagnant_cycles += 1;
                }
                self.stagnant_cycles >= self.config.cycles
            }
            None => false,
        };
        self.prev_distance = Some(distance);
        if tripped {
            self.stagnant_cycles = 0;
        }
        tripped
    }

    /// Current consecutive stagnant tick count.
    pub fn stagnant_cycles(&self) -> u32 {
        self.stagnant_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(cycles: u32) -> StagnationTracker {
        StagnationTracker::new(StagnationConfig {
            cycles,
            ..StagnationConfig::default()
        })
    }

    #[test]
    fn thirty_stagnant_ticks_trip_once_and_reset() {
        let mut t = tracker(30);
        t.record(0.5); // baseline
        for i in 1..30 {
            assert!(!t.record(0.5), "must not trip at tick {i}");
        }
        assert!(t.record(0.5), "must trip at the 30th stagnant tick");
        assert_eq!(t.stagnant_cycles(), 0);
        assert!(!t.record(0.5), "freshly reset counter must not trip");
    }

    #[test]
    fn progress_resets_the_counter() {
        let mut t = tracker(3);
        t.record(5.0);
        t.record(5.0);
        t.record(5.0);
        // Real progress: counter resets.
        assert!(!t.record(4.5));
        assert!(!t.record(4.5));
        assert!(!t.record(4.5));
        assert!(t.record(4.5));
    }

    #[test]
    fn no_accounting_near_the_goal() {
        let mut t = tracker(2);
        t.record(0.35);
        assert!(!t.record(0.35));
        assert!(!t.record(0.35));
        assert!(!t.record(0.35));
        assert_eq!(t.stagnant_cycles(), 0);
    }

    #[test]
    fn boundary_distance_is_exempt() {
        // Exactly min_dist is not "> 0.4".
        let mut t = tracker(2);
        t.record(0.4);
        assert!(!t.record(0.4));
        assert!(!t.record(0.4));
        assert_eq!(t.stagnant_cycles(), 0);
    }

    #[test]
    fn marginal_progress_still_counts_as_stagnant() {
        let mut t = tracker(3);
        t.record(2.0);
        assert!(!t.record(1.99)); // 0.01 < eps
        assert!(!t.record(1.98));
        assert!(t.record(1.97));
    }

    #[test]
    fn first_sample_never_trips() {
        let mut t = tracker(1);
        assert!(!t.record(10.0));
    }
}
