//! Deterministic planning: per-tick proposals, detour routing, and
//! multi-waypoint plan generation.
//!
//! The planner is the mode the system can always fall back to: no model, no
//! network, same output for the same input. It reacts to the previous
//! governance decision (slowing down, waiting, or detouring) and clamps
//! every proposed speed to `[0.1, 1.0]` and the zone limit so that the
//! policy engine's speed rule only fires on genuinely out-of-band requests.

use serde::{Deserialize, Serialize};
use warden_policy::ZoneSpeedLimits;
use warden_types::{
    ActionProposal, GovernanceDecision, Obstacle, Point, PolicyState, Rect, Telemetry, World,
};

use crate::llm::{extract_json, ChatMessage, LlmDriver, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for the deterministic planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Cruise speed proposed when nothing demands less.
    pub default_speed: f64,
    /// Distance at which the goal counts as reached.
    pub arrive_eps: f64,
    /// Perpendicular offset of detour waypoints from a blocking obstacle.
    pub detour_offset: f64,
    /// Detour attempts per approach before the planner gives up and waits.
    pub max_replans: u32,
    /// Speed used when governance demands SLOW and no explicit value parses.
    pub slow_speed: f64,
    pub zone_limits: ZoneSpeedLimits,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_speed: 0.8,
            arrive_eps: 0.3,
            detour_offset: 0.8,
            max_replans: 3,
            slow_speed: 0.3,
            zone_limits: ZoneSpeedLimits::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner
// ─────────────────────────────────────────────────────────────────────────────

/// The deterministic per-tick planner.
pub struct Planner {
    config: PlannerConfig,
    replans_used: u32,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            config,
            replans_used: 0,
        }
    }

    /// Produce one proposal for the current tick.
    ///
    /// Reacts to the previous tick's governance:
    /// - `STOP` → `WAIT` until the hazard clears.
    /// - `SLOW` → resubmit with the speed the remediation asked for.
    /// - `REPLAN` → detour perpendicular to the blocking obstacle, up to
    ///   `max_replans` times per approach, then `WAIT`.
    pub fn propose(
        &mut self,
        telemetry: &Telemetry,
        goal: Point,
        last_governance: Option<&GovernanceDecision>,
        world: Option<&World>,
    ) -> ActionProposal {
        let position = telemetry.position();

        if position.distance_to(&goal) <= self.config.arrive_eps {
            self.replans_used = 0;
            return ActionProposal::stop("Reached goal.");
        }

        let state = last_governance.map(|g| g.policy_state);
        match state {
            Some(PolicyState::Stop) => {
                ActionProposal::wait("Holding position; governance demands a stop.")
            }
            Some(PolicyState::Replan) => self.propose_detour(telemetry, goal, world),
            Some(PolicyState::Slow) => {
                let required = last_governance
                    .and_then(|g| g.required_action.as_deref())
                    .and_then(parse_required_speed)
                    .unwrap_or(self.config.slow_speed);
                let speed = self.clamp_speed(required, telemetry);
                ActionProposal::move_to(
                    goal.x,
                    goal.y,
                    speed,
                    format!("Proceeding to goal at reduced speed {speed:.2} m/s."),
                )
            }
            _ => {
                self.replans_used = 0;
                let speed = self.clamp_speed(self.config.default_speed, telemetry);
                ActionProposal::move_to(
                    goal.x,
                    goal.y,
                    speed,
                    "Navigating toward mission goal at a safe speed.",
                )
            }
        }
    }

    fn propose_detour(
        &mut self,
        telemetry: &Telemetry,
        goal: Point,
        world: Option<&World>,
    ) -> ActionProposal {
        if self.replans_used >= self.config.max_replans {
            return ActionProposal::wait("Replan budget exhausted; holding for intervention.");
        }
        let position = telemetry.position();
        let blocking = world.and_then(|w| nearest_blocking_obstacle(&position, &goal, w));
        match blocking {
            Some(ob) => {
                self.replans_used += 1;
                let waypoint = detour_waypoint(&position, &goal, &ob, self.config.detour_offset);
                let speed = self.clamp_speed(self.config.default_speed, telemetry);
                ActionProposal::move_to(
                    waypoint.x,
                    waypoint.y,
                    speed,
                    format!(
                        "Detouring via ({:.1}, {:.1}) around obstacle at ({:.1}, {:.1}).",
                        waypoint.x, waypoint.y, ob.x, ob.y
                    ),
                )
            }
            None => ActionProposal::wait("Replan requested but no obstacle found; holding."),
        }
    }

    fn clamp_speed(&self, speed: f64, telemetry: &Telemetry) -> f64 {
        let limit = self.config.zone_limits.for_zone(telemetry.zone);
        speed.clamp(0.1, 1.0).min(limit)
    }
}

/// Pull the speed value out of a remediation like `"reduce speed to 0.3"` or
/// `"reduce max_speed to <= 0.5"`.
fn parse_required_speed(action: &str) -> Option<f64> {
    action
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .next_back()
}

// ─────────────────────────────────────────────────────────────────────────────
// Detour geometry
// ─────────────────────────────────────────────────────────────────────────────

fn nearest_blocking_obstacle(start: &Point, goal: &Point, world: &World) -> Option<Obstacle> {
    world
        .obstacles
        .iter()
        .map(|ob| (ob, ob.center().distance_to_segment(start, goal) - ob.r))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(ob, _)| *ob)
}

/// Waypoint offset perpendicular to the approach bearing, on whichever side
/// leaves more clearance from the obstacle.
fn detour_waypoint(start: &Point, goal: &Point, obstacle: &Obstacle, offset: f64) -> Point {
    let (dx, dy) = (goal.x - start.x, goal.y - start.y);
    let norm = (dx * dx + dy * dy).sqrt().max(1e-9);
    let (px, py) = (-dy / norm, dx / norm);
    let center = obstacle.center();

    let c1 = Point::new(center.x + px * offset, center.y + py * offset);
    let c2 = Point::new(center.x - px * offset, center.y - py * offset);

    let score = |c: &Point| {
        let leg_in = center.distance_to_segment(start, c);
        let leg_out = center.distance_to_segment(c, goal);
        leg_in.min(leg_out)
    };
    if score(&c1) >= score(&c2) {
        c1
    } else {
        c2
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Path preview
// ─────────────────────────────────────────────────────────────────────────────

/// Lightweight path preview: a straight polyline, or one detour waypoint
/// around the first obstacle that intrudes on the line.
pub fn plan_route(
    start: Point,
    goal: Point,
    obstacles: &[Obstacle],
    clearance_m: f64,
) -> (Vec<Point>, &'static str) {
    let blocking = obstacles.iter().find(|ob| {
        ob.center().distance_to_segment(&start, &goal) <= ob.r + clearance_m
    });

    match blocking {
        None => (vec![start, goal], "straight"),
        Some(ob) => {
            let detour = detour_waypoint(&start, &goal, ob, ob.r + clearance_m + 1.0);
            (vec![start, detour, goal], "detour")
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan generation
// ─────────────────────────────────────────────────────────────────────────────

/// One waypoint of a generated plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub max_speed: f64,
}

/// A multi-waypoint plan with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPlan {
    pub waypoints: Vec<Waypoint>,
    pub rationale: String,
    pub estimated_time_s: f64,
    pub model_used: String,
}

/// Generate a plan for an instruction: LLM when available, deterministic
/// two-waypoint fallback otherwise. Waypoints are clamped to the geofence
/// and speeds to `[0.1, 1.0]`.
pub async fn generate_plan(
    llm: Option<&LlmDriver>,
    telemetry: &Telemetry,
    instruction: &str,
    goal: Option<Point>,
    geofence: Rect,
) -> GeneratedPlan {
    if let Some(driver) = llm {
        match llm_plan(driver, telemetry, instruction, goal).await {
            Ok(mut plan) => {
                clamp_waypoints(&mut plan.waypoints, &geofence);
                plan.estimated_time_s = estimate_time(telemetry.position(), &plan.waypoints);
                return plan;
            }
            Err(e) => {
                tracing::warn!(error = %e, "plan generation fell back to deterministic");
            }
        }
    }
    deterministic_plan(telemetry, goal, geofence)
}

async fn llm_plan(
    driver: &LlmDriver,
    telemetry: &Telemetry,
    instruction: &str,
    goal: Option<Point>,
) -> Result<GeneratedPlan, crate::llm::LlmError> {
    let goal_text = match goal {
        Some(g) => format!("GOAL: ({:.1}, {:.1})", g.x, g.y),
        None => "No explicit goal coordinate.".to_string(),
    };
    let prompt = format!(
        "You are a route planner for a warehouse robot.\n\
         INSTRUCTION: {instruction}\n\
         STATE: {}\n\
         {goal_text}\n\
         Output STRICT JSON:\n\
         {{\"waypoints\": [{{\"x\": <float>, \"y\": <float>, \"max_speed\": <float>}}], \
         \"rationale\": \"...\"}}",
        serde_json::to_string(telemetry).unwrap_or_default(),
    );
    let messages = [ChatMessage {
        role: Role::User,
        content: prompt,
    }];
    let text = driver.complete(&messages).await?;
    let value = extract_json(&text)?;
    let waypoints: Vec<Waypoint> = serde_json::from_value(value["waypoints"].clone())
        .map_err(|e| crate::llm::LlmError::BadResponse(format!("waypoints: {e}")))?;
    Ok(GeneratedPlan {
        waypoints,
        rationale: value["rationale"].as_str().unwrap_or_default().to_string(),
        estimated_time_s: 0.0,
        model_used: driver.model().to_string(),
    })
}

fn deterministic_plan(telemetry: &Telemetry, goal: Option<Point>, geofence: Rect) -> GeneratedPlan {
    let position = telemetry.position();
    let goal = goal.unwrap_or_else(|| Point::new(15.0, 10.0));
    let base: f64 = if telemetry.human_detected { 0.4 } else { 0.6 };
    let speed = base.min(ZoneSpeedLimits::default().for_zone(telemetry.zone));
    let mut waypoints = vec![
        Waypoint {
            x: (position.x + goal.x) / 2.0,
            y: (position.y + goal.y) / 2.0,
            max_speed: speed,
        },
        Waypoint {
            x: goal.x,
            y: goal.y,
            max_speed: speed,
        },
    ];
    clamp_waypoints(&mut waypoints, &geofence);
    GeneratedPlan {
        estimated_time_s: estimate_time(position, &waypoints),
        waypoints,
        rationale: "Deterministic two-waypoint plan toward the goal.".to_string(),
        model_used: "deterministic".to_string(),
    }
}

fn clamp_waypoints(waypoints: &mut [Waypoint], geofence: &Rect) {
    for wp in waypoints {
        wp.x = wp.x.clamp(geofence.min_x, geofence.max_x);
        wp.y = wp.y.clamp(geofence.min_y, geofence.max_y);
        wp.max_speed = wp.max_speed.clamp(0.1, 1.0);
    }
}

fn estimate_time(start: Point, waypoints: &[Waypoint]) -> f64 {
    let mut from = start;
    let mut total = 0.0;
    for wp in waypoints {
        let to = Point::new(wp.x, wp.y);
        total += from.distance_to(&to) / wp.max_speed.max(0.1);
        from = to;
    }
    total
}
