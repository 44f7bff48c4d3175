//! The policy engine: a pure evaluator from (telemetry, proposal) to a
//! governance decision.
//!
//! Every rule in the catalog is checked on every call; hits carry a severity
//! class, a policy state, an effect, and an optional remediation. The
//! aggregate decision is fully deterministic:
//!
//! 1. `risk_score = clamp(Σ weight(severity), 0, 1)`, raised to the highest
//!    per-rule risk floor among hits.
//! 2. `policy_state` = the most severe state among hits
//!    (`STOP > REPLAN > SLOW > SAFE`).
//! 3. `DENIED` when any hit carries a deny effect or `risk ≥ deny_min`;
//!    `NEEDS_REVIEW` when any hit requires review or
//!    `risk ≥ review_min` with at least one MEDIUM hit; `APPROVED` otherwise.
//! 4. `required_action` = the first remediation in policy-id order.
//!
//! The engine performs no I/O and holds no locks; identical inputs produce
//! bit-identical decisions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use warden_types::{
    ActionProposal, Decision, GovernanceDecision, PolicyState, Point, Severity, Telemetry, World,
};

use crate::config::PolicyConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Hits
// ─────────────────────────────────────────────────────────────────────────────

/// What a violated rule demands of the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// Hard block.
    Deny,
    /// Execution allowed only after operator review.
    NeedsReview,
    /// Recorded (state may escalate) but does not gate the decision.
    Allow,
}

/// One violated rule.
#[derive(Debug, Clone)]
struct PolicyHit {
    id: &'static str,
    severity: Severity,
    state: PolicyState,
    effect: Effect,
    reason: String,
    required_action: Option<String>,
    /// Minimum aggregate risk this hit forces, regardless of weights.
    risk_floor: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// PolicyEngine
// ─────────────────────────────────────────────────────────────────────────────

/// The deterministic governance evaluator.
///
/// # Example
///
/// ```
/// use warden_policy::{PolicyConfig, PolicyEngine};
/// use warden_types::{ActionProposal, Telemetry};
///
/// let engine = PolicyEngine::new(PolicyConfig::default());
/// let telemetry: Telemetry = serde_json::from_str(
///     r#"{"x":1.0,"y":1.0,"theta":0.0,"speed":0.0,"zone":"aisle"}"#,
/// ).unwrap();
/// let proposal = ActionProposal::move_to(10.0, 10.0, 0.4, "to goal");
/// let decision = engine.evaluate(&telemetry, &proposal, None);
/// assert!(decision.is_approved());
/// ```
pub struct PolicyEngine {
    config: Arc<PolicyConfig>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate a proposal and **fail closed**: any panic inside the rule set
    /// yields `DENIED / STOP / risk 1.0` with reason `"engine_error"`.
    pub fn evaluate_failsafe(
        &self,
        telemetry: &Telemetry,
        proposal: &ActionProposal,
        world: Option<&World>,
    ) -> GovernanceDecision {
        catch_unwind(AssertUnwindSafe(|| self.evaluate(telemetry, proposal, world)))
            .unwrap_or_else(|_| GovernanceDecision {
                decision: Decision::Denied,
                policy_state: PolicyState::Stop,
                policy_hits: Vec::new(),
                reasons: vec!["engine_error".to_string()],
                required_action: None,
                risk_score: 1.0,
            })
    }

    /// Evaluate a proposal against the full rule catalog.
    ///
    /// `world` supplies the live geofence and obstacle map; without it the
    /// configured geofence is used and path-blocking checks are skipped.
    pub fn evaluate(
        &self,
        telemetry: &Telemetry,
        proposal: &ActionProposal,
        world: Option<&World>,
    ) -> GovernanceDecision {
        let cfg = &self.config;
        let mut hits: Vec<PolicyHit> = Vec::new();

        let movement = proposal.action.is_movement();
        let max_speed = proposal.action.max_speed().unwrap_or(0.0);
        let target = proposal.action.target();
        let geofence = world.map(|w| w.geofence).unwrap_or(cfg.geofence);

        // GEOFENCE_01: proposed target outside the geofence.
        if let Some(target) = target {
            if !geofence.contains(&target) {
                hits.push(PolicyHit {
                    id: "GEOFENCE_01",
                    severity: Severity::High,
                    state: PolicyState::Stop,
                    effect: Effect::Deny,
                    reason: format!(
                        "Proposed target ({:.2}, {:.2}) is outside the geofence.",
                        target.x, target.y
                    ),
                    required_action: Some("choose a target inside the geofence".to_string()),
                    risk_floor: 1.0,
                });
            }
        }

        // HUMAN_PROX_01: human inside the stop radius (boundary inclusive).
        if movement && telemetry.human_detected && telemetry.human_distance_m <= cfg.stop_radius_m
        {
            hits.push(PolicyHit {
                id: "HUMAN_PROX_01",
                severity: Severity::High,
                state: PolicyState::Stop,
                effect: Effect::Deny,
                reason: format!(
                    "Human at {:.2} m, inside the {:.1} m stop radius.",
                    telemetry.human_distance_m, cfg.stop_radius_m
                ),
                required_action: Some("halt".to_string()),
                risk_floor: 0.9,
            });
        }

        // HUMAN_PROX_02: human inside the slow radius. Always recorded
        // (state SLOW); review is required only when the proposed speed
        // exceeds the slow cap.
        if movement
            && telemetry.human_detected
            && telemetry.human_distance_m > cfg.stop_radius_m
            && telemetry.human_distance_m <= cfg.slow_radius_m
        {
            let over = max_speed > cfg.slow_speed;
            hits.push(PolicyHit {
                id: "HUMAN_PROX_02",
                severity: Severity::Medium,
                state: PolicyState::Slow,
                effect: if over { Effect::NeedsReview } else { Effect::Allow },
                reason: if over {
                    format!(
                        "Human at {:.2} m; max_speed {:.2} exceeds slow cap {}.",
                        telemetry.human_distance_m, max_speed, cfg.slow_speed
                    )
                } else {
                    format!(
                        "Human at {:.2} m; speed already within slow cap {}.",
                        telemetry.human_distance_m, cfg.slow_speed
                    )
                },
                required_action: over.then(|| format!("reduce speed to {}", cfg.slow_speed)),
                risk_floor: 0.0,
            });
        }

        // SPEED_LIMIT_01: proposed speed above the zone limit.
        if movement {
            let limit = cfg.zone_limits.for_zone(telemetry.zone);
            if max_speed > limit {
                hits.push(PolicyHit {
                    id: "SPEED_LIMIT_01",
                    severity: Severity::Medium,
                    state: PolicyState::Slow,
                    effect: Effect::NeedsReview,
                    reason: format!(
                        "max_speed {max_speed:.4} exceeds the {limit} limit for zone {:?}.",
                        telemetry.zone
                    ),
                    required_action: Some(format!("reduce max_speed to <= {limit}")),
                    risk_floor: 0.0,
                });
            }
        }

        // COLLISION_01: obstacle already inside the collision radius.
        if movement && telemetry.nearest_obstacle_m < cfg.collision_radius_m {
            hits.push(PolicyHit {
                id: "COLLISION_01",
                severity: Severity::High,
                state: PolicyState::Replan,
                effect: Effect::Deny,
                reason: format!(
                    "Obstacle at {:.2} m, inside the {:.1} m collision radius.",
                    telemetry.nearest_obstacle_m, cfg.collision_radius_m
                ),
                required_action: Some("replan with safer clearance".to_string()),
                risk_floor: 0.85,
            });
        }

        // PATH_BLOCKED_01: an obstacle sits on the straight segment to the
        // target with insufficient clearance.
        if let (Some(target), Some(world)) = (target, world) {
            let start = telemetry.position();
            if let Some(blocking) = first_blocking_obstacle(
                &start,
                &target,
                world,
                cfg.min_path_clearance_m,
            ) {
                hits.push(PolicyHit {
                    id: "PATH_BLOCKED_01",
                    severity: Severity::Medium,
                    state: PolicyState::Replan,
                    effect: Effect::Deny,
                    reason: format!(
                        "Obstacle at ({:.1}, {:.1}) blocks the segment to the target.",
                        blocking.x, blocking.y
                    ),
                    required_action: Some(format!(
                        "replan around obstacle at ({:.1}, {:.1})",
                        blocking.x, blocking.y
                    )),
                    risk_floor: 0.0,
                });
            }
        }

        // BATTERY_01: advisory. Low charge flags the decision for review
        // without escalating the policy state.
        if let Some(battery) = telemetry.battery_percent {
            if battery < cfg.low_battery_percent {
                hits.push(PolicyHit {
                    id: "BATTERY_01",
                    severity: Severity::Low,
                    state: PolicyState::Safe,
                    effect: Effect::NeedsReview,
                    reason: format!(
                        "Battery at {battery:.0}%, below the {:.0}% advisory threshold.",
                        cfg.low_battery_percent
                    ),
                    required_action: Some("schedule a recharge".to_string()),
                    risk_floor: 0.0,
                });
            }
        }

        self.aggregate(hits)
    }

    fn aggregate(&self, mut hits: Vec<PolicyHit>) -> GovernanceDecision {
        let cfg = &self.config;
        hits.sort_by(|a, b| a.id.cmp(b.id));

        let weighted: f64 = hits
            .iter()
            .map(|h| cfg.weights.for_severity(h.severity))
            .sum();
        let floor = hits.iter().fold(0.0f64, |acc, h| acc.max(h.risk_floor));
        let risk_score = weighted.clamp(0.0, 1.0).max(floor).clamp(0.0, 1.0);

        let policy_state = hits
            .iter()
            .fold(PolicyState::Safe, |acc, h| acc.max(h.state));

        let any_deny = hits.iter().any(|h| h.effect == Effect::Deny);
        let any_review = hits.iter().any(|h| h.effect == Effect::NeedsReview);
        let any_medium = hits.iter().any(|h| h.severity == Severity::Medium);

        let decision = if any_deny || risk_score >= cfg.deny_min {
            Decision::Denied
        } else if any_review || (risk_score >= cfg.review_min && any_medium) {
            Decision::NeedsReview
        } else {
            Decision::Approved
        };

        let required_action = hits.iter().find_map(|h| h.required_action.clone());

        GovernanceDecision {
            decision,
            policy_state,
            policy_hits: hits.iter().map(|h| h.id.to_string()).collect(),
            reasons: hits.into_iter().map(|h| h.reason).collect(),
            required_action,
            risk_score,
        }
    }
}

/// First obstacle whose edge clears the segment `start`–`target` by less
/// than `min_clearance`.
fn first_blocking_obstacle(
    start: &Point,
    target: &Point,
    world: &World,
    min_clearance: f64,
) -> Option<Point> {
    world.obstacles.iter().find_map(|ob| {
        let center = ob.center();
        let clearance = center.distance_to_segment(start, target) - ob.r;
        (clearance < min_clearance).then_some(center)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{ActionIntent, Obstacle, Rect, Zone};

    fn telemetry(x: f64, y: f64) -> Telemetry {
        Telemetry {
            x,
            y,
            theta: 0.0,
            speed: 0.0,
            zone: Zone::Aisle,
            nearest_obstacle_m: 999.0,
            human_detected: false,
            human_conf: 0.0,
            human_distance_m: 999.0,
            battery_percent: None,
            target: None,
            events: Vec::new(),
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    fn world_with_obstacles(obstacles: Vec<Obstacle>) -> World {
        World {
            geofence: Rect {
                min_x: 0.0,
                max_x: 30.0,
                min_y: 0.0,
                max_y: 20.0,
            },
            zones: Vec::new(),
            obstacles,
            human: None,
            bays: Vec::new(),
        }
    }

    // ── Clean path ───────────────────────────────────────────────────────────

    #[test]
    fn clean_move_is_approved() {
        let dec = engine().evaluate(
            &telemetry(1.0, 1.0),
            &ActionProposal::move_to(10.0, 10.0, 0.4, ""),
            None,
        );
        assert_eq!(dec.decision, Decision::Approved);
        assert_eq!(dec.policy_state, PolicyState::Safe);
        assert!(dec.policy_hits.is_empty());
        assert_eq!(dec.risk_score, 0.0);
    }

    #[test]
    fn stop_is_always_approved_even_near_human() {
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 0.5;
        let dec = engine().evaluate(&tel, &ActionProposal::stop(""), None);
        assert_eq!(dec.decision, Decision::Approved);
    }

    // ── HUMAN_PROX_01 boundary ───────────────────────────────────────────────

    #[test]
    fn human_at_exactly_stop_radius_denies_with_stop() {
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 1.00;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.3, ""), None);
        assert_eq!(dec.decision, Decision::Denied);
        assert_eq!(dec.policy_state, PolicyState::Stop);
        assert_eq!(dec.policy_hits, vec!["HUMAN_PROX_01"]);
        assert!(dec.risk_score >= 0.9);
        assert_eq!(dec.required_action.as_deref(), Some("halt"));
    }

    #[test]
    fn human_just_outside_stop_radius_slows() {
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 1.01;

        // Compliant speed: approved, state SLOW, hit recorded.
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.3, ""), None);
        assert_eq!(dec.decision, Decision::Approved);
        assert_eq!(dec.policy_state, PolicyState::Slow);
        assert_eq!(dec.policy_hits, vec!["HUMAN_PROX_02"]);

        // Excessive speed: review required.
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.4, ""), None);
        assert_eq!(dec.decision, Decision::NeedsReview);
        assert_eq!(dec.policy_state, PolicyState::Slow);
    }

    #[test]
    fn human_approaching_requires_speed_reduction() {
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.4;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.8, ""), None);
        assert_eq!(dec.decision, Decision::NeedsReview);
        assert_eq!(dec.policy_state, PolicyState::Slow);
        assert_eq!(dec.required_action.as_deref(), Some("reduce speed to 0.3"));
        // Resubmitting at the slow cap is approved.
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.3, ""), None);
        assert_eq!(dec.decision, Decision::Approved);
    }

    #[test]
    fn human_beyond_slow_radius_is_clean() {
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 3.01;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 5.0, 0.4, ""), None);
        assert!(dec.policy_hits.is_empty());
    }

    // ── GEOFENCE_01 ──────────────────────────────────────────────────────────

    #[test]
    fn target_just_outside_geofence_denies_at_full_risk() {
        let dec = engine().evaluate(
            &telemetry(1.0, 1.0),
            &ActionProposal::move_to(-0.001, 5.0, 0.3, ""),
            None,
        );
        assert_eq!(dec.decision, Decision::Denied);
        assert!(dec.policy_hits.contains(&"GEOFENCE_01".to_string()));
        assert_eq!(dec.risk_score, 1.0);
        assert_eq!(dec.policy_state, PolicyState::Stop);
    }

    #[test]
    fn geofence_uses_world_when_present() {
        let mut world = world_with_obstacles(vec![]);
        world.geofence = Rect {
            min_x: 0.0,
            max_x: 5.0,
            min_y: 0.0,
            max_y: 5.0,
        };
        let dec = engine().evaluate(
            &telemetry(1.0, 1.0),
            &ActionProposal::move_to(10.0, 1.0, 0.3, ""),
            Some(&world),
        );
        assert!(dec.policy_hits.contains(&"GEOFENCE_01".to_string()));
    }

    // ── SPEED_LIMIT_01 boundary ──────────────────────────────────────────────

    #[test]
    fn speed_marginally_over_aisle_limit_is_flagged() {
        let dec = engine().evaluate(
            &telemetry(1.0, 1.0),
            &ActionProposal::move_to(10.0, 10.0, 0.5001, ""),
            None,
        );
        assert_eq!(dec.policy_hits, vec!["SPEED_LIMIT_01"]);
        assert_eq!(dec.decision, Decision::NeedsReview);
        assert_eq!(dec.policy_state, PolicyState::Slow);
    }

    #[test]
    fn speed_at_limit_passes() {
        let dec = engine().evaluate(
            &telemetry(1.0, 1.0),
            &ActionProposal::move_to(10.0, 10.0, 0.5, ""),
            None,
        );
        assert!(dec.policy_hits.is_empty());
    }

    #[test]
    fn loading_bay_limit_is_tighter() {
        let mut tel = telemetry(1.0, 15.0);
        tel.zone = Zone::LoadingBay;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(5.0, 15.0, 0.45, ""), None);
        assert_eq!(dec.policy_hits, vec!["SPEED_LIMIT_01"]);
    }

    // ── COLLISION_01 / PATH_BLOCKED_01 ───────────────────────────────────────

    #[test]
    fn obstacle_inside_collision_radius_denies_with_replan() {
        let mut tel = telemetry(1.0, 1.0);
        tel.nearest_obstacle_m = 0.4;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.3, ""), None);
        assert_eq!(dec.decision, Decision::Denied);
        assert_eq!(dec.policy_state, PolicyState::Replan);
        assert!(dec.risk_score >= 0.85);
    }

    #[test]
    fn blocked_straight_segment_requires_replan() {
        let world = world_with_obstacles(vec![Obstacle {
            x: 5.0,
            y: 5.0,
            r: 0.6,
        }]);
        let tel = telemetry(0.0, 5.0);
        let dec = engine().evaluate(
            &tel,
            &ActionProposal::move_to(10.0, 5.0, 0.3, ""),
            Some(&world),
        );
        assert_eq!(dec.decision, Decision::Denied);
        assert_eq!(dec.policy_state, PolicyState::Replan);
        assert_eq!(dec.policy_hits, vec!["PATH_BLOCKED_01"]);
        assert!(dec
            .required_action
            .as_deref()
            .unwrap()
            .contains("replan around obstacle"));
    }

    #[test]
    fn detour_waypoint_clears_the_blocked_segment() {
        let world = world_with_obstacles(vec![Obstacle {
            x: 5.0,
            y: 5.0,
            r: 0.6,
        }]);
        let tel = telemetry(0.0, 5.0);
        // Perpendicular detour offset by 0.8 m from the obstacle center.
        let dec = engine().evaluate(
            &tel,
            &ActionProposal::move_to(5.0, 5.8, 0.3, ""),
            Some(&world),
        );
        assert_eq!(dec.decision, Decision::Approved, "hits: {:?}", dec.policy_hits);
    }

    // ── BATTERY_01 ───────────────────────────────────────────────────────────

    #[test]
    fn low_battery_is_advisory() {
        let mut tel = telemetry(1.0, 1.0);
        tel.battery_percent = Some(15.0);
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.3, ""), None);
        assert_eq!(dec.decision, Decision::NeedsReview);
        assert_eq!(dec.policy_state, PolicyState::Safe);
        assert_eq!(dec.policy_hits, vec!["BATTERY_01"]);
    }

    #[test]
    fn healthy_battery_passes() {
        let mut tel = telemetry(1.0, 1.0);
        tel.battery_percent = Some(80.0);
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.3, ""), None);
        assert!(dec.policy_hits.is_empty());
    }

    // ── Aggregation ──────────────────────────────────────────────────────────

    #[test]
    fn hits_are_sorted_by_policy_id() {
        let mut tel = telemetry(1.0, 1.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.0;
        tel.battery_percent = Some(10.0);
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.8, ""), None);
        let mut sorted = dec.policy_hits.clone();
        sorted.sort();
        assert_eq!(dec.policy_hits, sorted);
        assert!(dec.policy_hits.len() >= 3);
    }

    #[test]
    fn required_action_follows_policy_id_order() {
        let mut tel = telemetry(1.0, 1.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.4;
        // Both HUMAN_PROX_02 and SPEED_LIMIT_01 carry remediations; the
        // policy-id order picks the human-proximity one.
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.8, ""), None);
        assert_eq!(dec.required_action.as_deref(), Some("reduce speed to 0.3"));
    }

    #[test]
    fn stop_state_dominates_slower_states() {
        let mut tel = telemetry(1.0, 1.0);
        tel.human_detected = true;
        tel.human_distance_m = 0.8;
        tel.nearest_obstacle_m = 0.4;
        let dec = engine().evaluate(&tel, &ActionProposal::move_to(10.0, 10.0, 0.8, ""), None);
        assert_eq!(dec.policy_state, PolicyState::Stop);
        assert_eq!(dec.decision, Decision::Denied);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut tel = telemetry(3.0, 4.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.2;
        tel.battery_percent = Some(12.0);
        let prop = ActionProposal::move_to(12.0, 9.0, 0.7, "same input");
        let e = engine();
        let a = serde_json::to_string(&e.evaluate(&tel, &prop, None)).unwrap();
        let b = serde_json::to_string(&e.evaluate(&tel, &prop, None)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn modify_speed_is_governed_like_movement() {
        let mut tel = telemetry(1.0, 1.0);
        tel.human_detected = true;
        tel.human_distance_m = 0.9;
        let dec = engine().evaluate(&tel, &ActionProposal::modify_speed(0.6, ""), None);
        assert_eq!(dec.decision, Decision::Denied);
        assert_eq!(dec.policy_state, PolicyState::Stop);
    }

    #[test]
    fn failsafe_matches_plain_evaluation_on_good_input() {
        let tel = telemetry(1.0, 1.0);
        let prop = ActionProposal::move_to(10.0, 10.0, 0.4, "");
        let e = engine();
        assert_eq!(
            e.evaluate(&tel, &prop, None),
            e.evaluate_failsafe(&tel, &prop, None)
        );
    }

    // ── Pseudo-random sweep over the schema ranges ───────────────────────────

    /// Simple LCG so the sweep is reproducible without extra dependencies.
    struct Lcg(u64);

    impl Lcg {
        fn next_f64(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    #[test]
    fn random_inputs_satisfy_aggregation_invariants() {
        let e = engine();
        let mut rng = Lcg(0x5eed);
        let start = std::time::Instant::now();
        for _ in 0..500 {
            let mut tel = telemetry(rng.next_f64() * 30.0, rng.next_f64() * 20.0);
            tel.human_detected = rng.next_f64() < 0.5;
            tel.human_distance_m = rng.next_f64() * 6.0;
            tel.nearest_obstacle_m = rng.next_f64() * 3.0;
            tel.battery_percent = (rng.next_f64() < 0.5).then(|| rng.next_f64() * 100.0);
            let prop = if rng.next_f64() < 0.8 {
                ActionProposal::move_to(
                    rng.next_f64() * 35.0 - 2.0,
                    rng.next_f64() * 25.0 - 2.0,
                    rng.next_f64() * 1.2,
                    "",
                )
            } else {
                ActionProposal::stop("")
            };

            let dec = e.evaluate(&tel, &prop, None);
            assert!((0.0..=1.0).contains(&dec.risk_score));
            assert_eq!(dec.policy_hits.len(), dec.reasons.len());
            if dec.risk_score >= 0.95 {
                assert_eq!(dec.decision, Decision::Denied);
            }
            if dec.policy_hits.is_empty() {
                assert_eq!(dec.decision, Decision::Approved);
                assert_eq!(dec.policy_state, PolicyState::Safe);
            }
        }
        // 500 evaluations must finish far inside the per-call latency budget.
        assert!(start.elapsed().as_millis() < 1000);
    }

    #[test]
    fn wait_intent_has_no_speed() {
        assert_eq!(ActionIntent::Wait.max_speed(), None);
    }
}
