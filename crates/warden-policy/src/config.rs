//! Policy thresholds and risk weights.
//!
//! Loaded once at startup and held as an immutable snapshot behind an `Arc`;
//! every tick reads the same frozen values, so evaluation stays bit-for-bit
//! reproducible across the life of a run.

use serde::{Deserialize, Serialize};
use warden_types::{Rect, Severity, Zone};

/// Risk contribution per rule severity class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            high: 0.5,
            medium: 0.25,
            low: 0.1,
        }
    }
}

impl RiskWeights {
    pub fn for_severity(&self, severity: Severity) -> f64 {
        match severity {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Per-zone speed limits (m/s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpeedLimits {
    pub aisle: f64,
    pub loading_bay: f64,
    pub other: f64,
}

impl Default for ZoneSpeedLimits {
    fn default() -> Self {
        Self {
            aisle: 0.5,
            loading_bay: 0.4,
            other: 0.5,
        }
    }
}

impl ZoneSpeedLimits {
    pub fn for_zone(&self, zone: Zone) -> f64 {
        match zone {
            Zone::Aisle => self.aisle,
            Zone::LoadingBay => self.loading_bay,
            Zone::Other => self.other,
        }
    }
}

/// The full policy configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Humans closer than this halt all movement (boundary inclusive).
    pub stop_radius_m: f64,
    /// Humans closer than this cap speed at `slow_speed`.
    pub slow_radius_m: f64,
    /// Speed cap near humans (m/s).
    pub slow_speed: f64,
    /// Obstacles closer than this deny movement outright.
    pub collision_radius_m: f64,
    /// Minimum clearance between a planned segment and an obstacle edge.
    pub min_path_clearance_m: f64,
    /// Battery level (percent) below which movement is advisory-flagged.
    pub low_battery_percent: f64,
    /// Fallback geofence when no world snapshot accompanies the evaluation.
    pub geofence: Rect,
    pub zone_limits: ZoneSpeedLimits,
    pub weights: RiskWeights,
    /// Risk at or above which a MEDIUM hit escalates to NEEDS_REVIEW.
    pub review_min: f64,
    /// Risk at or above which any proposal is DENIED.
    pub deny_min: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            stop_radius_m: 1.0,
            slow_radius_m: 3.0,
            slow_speed: 0.3,
            collision_radius_m: 0.5,
            min_path_clearance_m: 0.15,
            low_battery_percent: 20.0,
            geofence: Rect {
                min_x: 0.0,
                max_x: 30.0,
                min_y: 0.0,
                max_y: 20.0,
            },
            zone_limits: ZoneSpeedLimits::default(),
            weights: RiskWeights::default(),
            review_min: 0.70,
            deny_min: 0.95,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let cfg = PolicyConfig::default();
        assert_eq!(cfg.stop_radius_m, 1.0);
        assert_eq!(cfg.slow_radius_m, 3.0);
        assert_eq!(cfg.slow_speed, 0.3);
        assert_eq!(cfg.review_min, 0.70);
        assert_eq!(cfg.deny_min, 0.95);
    }

    #[test]
    fn zone_limits_lookup() {
        let limits = ZoneSpeedLimits::default();
        assert_eq!(limits.for_zone(Zone::Aisle), 0.5);
        assert_eq!(limits.for_zone(Zone::LoadingBay), 0.4);
    }

    #[test]
    fn weight_lookup() {
        let w = RiskWeights::default();
        assert_eq!(w.for_severity(Severity::High), 0.5);
        assert_eq!(w.for_severity(Severity::Medium), 0.25);
        assert_eq!(w.for_severity(Severity::Low), 0.1);
    }
}
