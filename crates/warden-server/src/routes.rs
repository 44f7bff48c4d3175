//! REST surface.
//!
//! Thin handlers over the shared components: mission CRUD and lifecycle,
//! run inspection and control, the policy catalog, and the synchronous
//! decision facade. Handlers validate, delegate, and translate errors;
//! nothing else.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use warden_agent::{Waypoint, plan_route};
use warden_sim::SimClient;
use warden_types::{ActionProposal, Mission, Point, Run, Telemetry, WardenError};

use crate::state::AppState;
use crate::ws::ws_run;

// ─────────────────────────────────────────────────────────────────────────────
// Error translation
// ─────────────────────────────────────────────────────────────────────────────

/// A handler failure, rendered as `{"detail": …}` with a matching status.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<WardenError> for ApiError {
    fn from(err: WardenError) -> Self {
        let status = match &err {
            WardenError::MissionNotFound(_) | WardenError::RunNotFound(_) => StatusCode::NOT_FOUND,
            WardenError::InvalidTransition(_) => StatusCode::CONFLICT,
            WardenError::Sim(_) | WardenError::Planner(_) => StatusCode::BAD_GATEWAY,
            WardenError::Protocol(_) => StatusCode::BAD_REQUEST,
            WardenError::Audit(_) | WardenError::Channel(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

fn audit_err(e: warden_audit::AuditError) -> ApiError {
    ApiError::from(WardenError::Audit(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request bodies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MissionCreate {
    title: String,
    goal: Point,
}

#[derive(Deserialize)]
struct MissionPatch {
    title: Option<String>,
    goal: Option<Point>,
}

#[derive(Deserialize)]
struct ScenarioBody {
    scenario: String,
}

#[derive(Deserialize)]
struct PolicyTestBody {
    telemetry: Telemetry,
    proposal: ActionProposal,
}

#[derive(Deserialize)]
struct PlanGenerateBody {
    instruction: String,
    goal: Option<Point>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct PlanExecuteBody {
    instruction: String,
    waypoints: Vec<Waypoint>,
    #[serde(default)]
    rationale: String,
}

#[derive(Deserialize)]
struct AgentProposeBody {
    instruction: String,
    goal: Option<Point>,
}

#[derive(Deserialize)]
struct EventsQuery {
    since_seq: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/missions", post(create_mission).get(list_missions))
        .route(
            "/missions/:id",
            get(get_mission).patch(patch_mission).delete(delete_mission),
        )
        .route("/missions/:id/start", post(start_mission))
        .route("/missions/:id/pause", post(pause_mission))
        .route("/missions/:id/resume", post(resume_mission))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/events", get(list_events))
        .route("/runs/:id/stop", post(stop_run))
        .route("/runs/:id/verify", get(verify_run))
        .route("/runs/:id/path_preview", get(path_preview))
        .route("/sim/world", get(sim_world))
        .route("/sim/scenario", post(sim_scenario))
        .route("/policies", get(list_policies))
        .route("/policies/test", post(policy_test))
        .route("/plan/generate", post(plan_generate))
        .route("/plan/execute", post(plan_execute))
        .route("/agent/propose", post(agent_propose))
        .route("/ws/runs/:run_id", get(ws_run))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "planner_enabled": state.planner_enabled }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Missions
// ─────────────────────────────────────────────────────────────────────────────

async fn create_mission(
    State(state): State<AppState>,
    Json(body): Json<MissionCreate>,
) -> Result<Json<Mission>, ApiError> {
    let mission = state
        .store
        .create_mission(&body.title, body.goal)
        .map_err(audit_err)?;
    Ok(Json(mission))
}

async fn list_missions(State(state): State<AppState>) -> Result<Json<Vec<Mission>>, ApiError> {
    Ok(Json(state.store.list_missions().map_err(audit_err)?))
}

async fn get_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Mission>, ApiError> {
    state
        .store
        .get_mission(&id)
        .map_err(audit_err)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("mission not found"))
}

async fn patch_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<MissionPatch>,
) -> Result<Json<Mission>, ApiError> {
    state
        .store
        .update_mission(&id, body.title.as_deref(), body.goal)
        .map_err(audit_err)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("mission not found"))
}

async fn delete_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.delete_mission(&id).map_err(audit_err)? {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::not_found("mission not found"))
    }
}

async fn start_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state.runs.start_run(&id)?;
    Ok(Json(json!({ "run_id": run.id })))
}

async fn pause_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Mission>, ApiError> {
    Ok(Json(state.runs.set_mission_paused(&id, true)?))
}

async fn resume_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Mission>, ApiError> {
    Ok(Json(state.runs.set_mission_paused(&id, false)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Runs
// ─────────────────────────────────────────────────────────────────────────────

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    state
        .store
        .get_run(&id)
        .map_err(audit_err)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("run not found"))
}

async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<warden_types::Event>>, ApiError> {
    Ok(Json(
        state.log.list(&id, query.since_seq).map_err(audit_err)?,
    ))
}

async fn stop_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.runs.stop_run(&id)?;
    Ok(Json(json!({ "ok": true })))
}

async fn verify_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.log.verify(&id).map_err(audit_err)?;
    Ok(Json(json!({ "ok": report.ok, "break_at": report.break_at })))
}

async fn path_preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // An attached plan is the authoritative preview.
    if let Some(waypoints) = state.runs.plan_preview(&id) {
        let points: Vec<Value> = waypoints
            .iter()
            .map(|wp| json!({"x": wp.x, "y": wp.y}))
            .collect();
        return Ok(Json(json!({ "points": points, "note": "plan" })));
    }

    let run = state
        .store
        .get_run(&id)
        .map_err(audit_err)?
        .ok_or_else(|| ApiError::not_found("run not found"))?;
    let mission = state
        .store
        .get_mission(&run.mission_id)
        .map_err(audit_err)?
        .ok_or_else(|| ApiError::not_found("mission not found"))?;

    let telemetry = state
        .sim
        .get_telemetry()
        .await
        .map_err(|e| ApiError::from(WardenError::Sim(e.to_string())))?;
    let world = state
        .sim
        .get_world()
        .await
        .map_err(|e| ApiError::from(WardenError::Sim(e.to_string())))?;

    let (points, note) = plan_route(telemetry.position(), mission.goal, &world.obstacles, 0.75);
    let points: Vec<Value> = points.iter().map(|p| json!({"x": p.x, "y": p.y})).collect();
    Ok(Json(json!({ "points": points, "note": note })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulator proxy
// ─────────────────────────────────────────────────────────────────────────────

async fn sim_world(State(state): State<AppState>) -> Result<Json<warden_types::World>, ApiError> {
    state
        .sim
        .get_world()
        .await
        .map(Json)
        .map_err(|e| ApiError::from(WardenError::Sim(e.to_string())))
}

async fn sim_scenario(
    State(state): State<AppState>,
    Json(body): Json<ScenarioBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .sim
        .trigger_scenario(&body.scenario)
        .await
        .map_err(|e| ApiError::from(WardenError::Sim(e.to_string())))?;
    Ok(Json(json!({ "ok": true })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Policies & decision facade
// ─────────────────────────────────────────────────────────────────────────────

async fn list_policies() -> Json<Vec<warden_types::PolicyInfo>> {
    Json(warden_policy::catalog())
}

async fn policy_test(
    State(state): State<AppState>,
    Json(body): Json<PolicyTestBody>,
) -> Json<warden_types::GovernanceDecision> {
    Json(state.facade.policy_test(&body.telemetry, &body.proposal))
}

async fn plan_generate(
    State(state): State<AppState>,
    Json(body): Json<PlanGenerateBody>,
) -> Result<Json<warden_runtime::PlanGenerateResponse>, ApiError> {
    let response = state
        .facade
        .plan_generate(&body.instruction, body.goal, body.model)
        .await?;
    Ok(Json(response))
}

async fn plan_execute(
    State(state): State<AppState>,
    Json(body): Json<PlanExecuteBody>,
) -> Result<Json<warden_runtime::PlanExecuteResponse>, ApiError> {
    let response = state
        .facade
        .plan_execute(&body.instruction, &body.waypoints, &body.rationale)
        .await?;
    Ok(Json(response))
}

async fn agent_propose(
    State(state): State<AppState>,
    Json(body): Json<AgentProposeBody>,
) -> Result<Json<warden_agent::AgenticOutcome>, ApiError> {
    let outcome = state
        .facade
        .agentic_propose(&body.instruction, body.goal)
        .await?;
    Ok(Json(outcome))
}
