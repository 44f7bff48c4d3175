//! `warden-types` – Shared data model for the Warden governance layer.
//!
//! Every crate in the workspace speaks these types: telemetry snapshots from
//! the simulator, action proposals from the planner, governance decisions
//! from the policy engine, hash-chained audit events, and the run/mission
//! rows that tie them together.
//!
//! Loosely-typed wire payloads (proposal intents, event kinds, hub frames)
//! are modeled as **closed tagged unions** so that unknown variants are
//! rejected at the boundary instead of leaking into the core.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// A 2-D point in world coordinates (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Distance from this point to the segment `a`–`b`.
    pub fn distance_to_segment(&self, a: &Point, b: &Point) -> f64 {
        let (abx, aby) = (b.x - a.x, b.y - a.y);
        let ab2 = abx * abx + aby * aby;
        if ab2 <= 1e-9 {
            return self.distance_to(a);
        }
        let t = (((self.x - a.x) * abx + (self.y - a.y) * aby) / ab2).clamp(0.0, 1.0);
        self.distance_to(&Point::new(a.x + t * abx, a.y + t * aby))
    }
}

/// An axis-aligned rectangle, used for the geofence and named zone regions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rect {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Rect {
    /// `true` when the point lies inside the rectangle (boundary inclusive).
    pub fn contains(&self, p: &Point) -> bool {
        self.min_x <= p.x && p.x <= self.max_x && self.min_y <= p.y && p.y <= self.max_y
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry & world
// ─────────────────────────────────────────────────────────────────────────────

/// Named floor zone with an associated speed regime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    #[default]
    Aisle,
    LoadingBay,
    Other,
}

fn default_far() -> f64 {
    999.0
}

/// One telemetry snapshot, produced by the simulator each tick and consumed
/// once by the run loop.
///
/// Optionals serialize as `null` (never omitted) so that the canonical JSON
/// preimage of an audit event is stable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Telemetry {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub speed: f64,
    #[serde(default)]
    pub zone: Zone,
    #[serde(default = "default_far")]
    pub nearest_obstacle_m: f64,
    #[serde(default)]
    pub human_detected: bool,
    #[serde(default)]
    pub human_conf: f64,
    #[serde(default = "default_far")]
    pub human_distance_m: f64,
    #[serde(default)]
    pub battery_percent: Option<f64>,
    #[serde(default)]
    pub target: Option<Point>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl Telemetry {
    /// Current robot position.
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A circular obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Obstacle {
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_obstacle_radius")]
    pub r: f64,
}

fn default_obstacle_radius() -> f64 {
    0.4
}

impl Obstacle {
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A named zone region of the world map.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZoneRegion {
    pub name: String,
    pub rect: Rect,
}

/// A docking / loading bay marker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Bay {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// The static-ish world map served by the simulator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct World {
    pub geofence: Rect,
    #[serde(default)]
    pub zones: Vec<ZoneRegion>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    #[serde(default)]
    pub human: Option<Point>,
    #[serde(default)]
    pub bays: Vec<Bay>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Action proposals
// ─────────────────────────────────────────────────────────────────────────────

/// Strict definition of the actions a planner is allowed to request.
///
/// The `intent`/`params` wire shape is a closed tagged union; unknown intents
/// fail deserialization at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "intent", content = "params")]
pub enum ActionIntent {
    #[serde(rename = "MOVE_TO")]
    MoveTo { x: f64, y: f64, max_speed: f64 },
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "WAIT")]
    Wait,
    #[serde(rename = "MODIFY_SPEED")]
    ModifySpeed { max_speed: f64 },
}

impl ActionIntent {
    /// The wire name of the intent (`"MOVE_TO"`, `"STOP"`, …).
    pub fn name(&self) -> &'static str {
        match self {
            ActionIntent::MoveTo { .. } => "MOVE_TO",
            ActionIntent::Stop => "STOP",
            ActionIntent::Wait => "WAIT",
            ActionIntent::ModifySpeed { .. } => "MODIFY_SPEED",
        }
    }

    /// Proposed speed, when the intent carries one.
    pub fn max_speed(&self) -> Option<f64> {
        match self {
            ActionIntent::MoveTo { max_speed, .. } | ActionIntent::ModifySpeed { max_speed } => {
                Some(*max_speed)
            }
            _ => None,
        }
    }

    /// Target position, when the intent carries one.
    pub fn target(&self) -> Option<Point> {
        match self {
            ActionIntent::MoveTo { x, y, .. } => Some(Point::new(*x, *y)),
            _ => None,
        }
    }

    /// `true` for intents whose execution can increase exposure (motion or a
    /// speed change). `STOP` and `WAIT` never do.
    pub fn is_movement(&self) -> bool {
        matches!(
            self,
            ActionIntent::MoveTo { .. } | ActionIntent::ModifySpeed { .. }
        )
    }
}

/// A planner-produced candidate action, before governance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionProposal {
    #[serde(flatten)]
    pub action: ActionIntent,
    #[serde(default)]
    pub rationale: String,
}

impl ActionProposal {
    pub fn move_to(x: f64, y: f64, max_speed: f64, rationale: impl Into<String>) -> Self {
        Self {
            action: ActionIntent::MoveTo { x, y, max_speed },
            rationale: rationale.into(),
        }
    }

    pub fn stop(rationale: impl Into<String>) -> Self {
        Self {
            action: ActionIntent::Stop,
            rationale: rationale.into(),
        }
    }

    pub fn wait(rationale: impl Into<String>) -> Self {
        Self {
            action: ActionIntent::Wait,
            rationale: rationale.into(),
        }
    }

    pub fn modify_speed(max_speed: f64, rationale: impl Into<String>) -> Self {
        Self {
            action: ActionIntent::ModifySpeed { max_speed },
            rationale: rationale.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Governance decisions
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a governance evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Decision {
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "DENIED")]
    Denied,
    #[serde(rename = "NEEDS_REVIEW")]
    NeedsReview,
}

/// Coarse severity label accompanying a decision.
///
/// Severity order (most to least severe): `STOP > REPLAN > SLOW > SAFE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PolicyState {
    #[serde(rename = "SAFE")]
    Safe,
    #[serde(rename = "SLOW")]
    Slow,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "REPLAN")]
    Replan,
}

impl PolicyState {
    /// Numeric severity used to pick the dominant state among policy hits.
    pub fn severity(&self) -> u8 {
        match self {
            PolicyState::Safe => 0,
            PolicyState::Slow => 1,
            PolicyState::Replan => 2,
            PolicyState::Stop => 3,
        }
    }

    /// The more severe of two states.
    pub fn max(self, other: PolicyState) -> PolicyState {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Rule severity class, used for risk weighting and the policy catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Severity {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
}

/// The policy engine's verdict on a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernanceDecision {
    pub decision: Decision,
    pub policy_state: PolicyState,
    pub policy_hits: Vec<String>,
    pub reasons: Vec<String>,
    pub required_action: Option<String>,
    pub risk_score: f64,
}

impl GovernanceDecision {
    /// An unconditional approval with no hits.
    pub fn approved() -> Self {
        Self {
            decision: Decision::Approved,
            policy_state: PolicyState::Safe,
            policy_hits: Vec::new(),
            reasons: Vec::new(),
            required_action: None,
            risk_score: 0.0,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approved
    }
}

/// Catalog entry describing one policy rule.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyInfo {
    pub policy_id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit events
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum EventType {
    #[serde(rename = "TELEMETRY")]
    Telemetry,
    #[serde(rename = "DECISION")]
    Decision,
    #[serde(rename = "EXECUTION")]
    Execution,
    #[serde(rename = "STAGNATION")]
    Stagnation,
    #[serde(rename = "PLAN")]
    Plan,
    #[serde(rename = "ALERT")]
    Alert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Telemetry => "TELEMETRY",
            EventType::Decision => "DECISION",
            EventType::Execution => "EXECUTION",
            EventType::Stagnation => "STAGNATION",
            EventType::Plan => "PLAN",
            EventType::Alert => "ALERT",
        }
    }
}

/// One immutable link of a run's chain of trust.
///
/// `hash` covers the canonical JSON of
/// `{seq, run_id, ts, type, payload, prev_hash}`; `prev_hash` is the previous
/// event's `hash`, or 64 zeros for `seq == 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub id: String,
    pub run_id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: serde_json::Value,
    pub prev_hash: String,
    pub hash: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Runs & missions
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a run. Terminal states never re-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// One governed execution of a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub mission_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Lifecycle state of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Pending,
    Active,
    Paused,
    Completed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Active => "active",
            MissionStatus::Paused => "paused",
            MissionStatus::Completed => "completed",
        }
    }
}

/// A mission: the title doubles as the natural-language task handed to the
/// planner; `goal` is the target position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub goal: Point,
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Hub messages
// ─────────────────────────────────────────────────────────────────────────────

/// Kind discriminator for live fan-out frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Telemetry,
    Event,
    Alert,
    Status,
    AgentReasoning,
}

/// A typed frame delivered to run subscribers over the hub / WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    pub kind: MessageKind,
    pub data: serde_json::Value,
}

impl HubMessage {
    pub fn new(kind: MessageKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    /// Convenience constructor for `{"kind":"status","data":{"status":…}}`.
    pub fn status(status: RunStatus) -> Self {
        Self::new(
            MessageKind::Status,
            serde_json::json!({ "status": status.as_str() }),
        )
    }

    /// Convenience constructor for alert frames.
    pub fn alert(data: serde_json::Value) -> Self {
        Self::new(MessageKind::Alert, data)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ids & shared errors
// ─────────────────────────────────────────────────────────────────────────────

/// Mint an opaque id with a short type prefix, e.g. `run_3f1c…`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Cross-crate error type for the governed control path.
///
/// Crates keep their own specific error enums; this type is the common
/// currency where the run loop and server need a single one.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("simulator error: {0}")]
    Sim(String),

    #[error("planner error: {0}")]
    Planner(String),

    #[error("audit log error: {0}")]
    Audit(String),

    #[error("protocol mismatch: {0}")]
    Protocol(String),

    #[error("broadcast channel error: {0}")]
    Channel(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("mission not found: {0}")]
    MissionNotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}
