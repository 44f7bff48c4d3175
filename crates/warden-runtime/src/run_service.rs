//! [`RunService`] – run lifecycle and the per-run control loop.
//!
//! Each started run owns one cooperative task that drives the
//! poll → propose → govern → execute → append → broadcast cycle until the
//! mission completes, an operator stops it, or a fault fails it. The service
//! tracks those tasks in an explicit registry keyed by run id: at most one
//! live task per run, spawn/stop/reap/auto-resume all go through it.
//!
//! The loop is the **single writer** for its run's event chain and its sim
//! command stream; everything else only reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use warden_agent::{AgentRouter, AgenticConfig, LlmSettings, PlannerConfig, Waypoint};
use warden_audit::{AuditError, ControlStore, EventLog};
use warden_hub::RunHub;
use warden_policy::PolicyEngine;
use warden_sim::SimClient;
use warden_types::{
    ActionIntent, ActionProposal, EventType, GovernanceDecision, HubMessage, MessageKind, Mission,
    MissionStatus, Run, RunStatus, WardenError, World,
};

use crate::stagnation::{StagnationConfig, StagnationTracker};

// ─────────────────────────────────────────────────────────────────────────────
// Errors & configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A fault that ends a run loop (transient simulator hiccups are handled
/// in-loop and never reach this type).
#[derive(Error, Debug)]
pub enum RunError {
    #[error("audit failure: {0}")]
    Audit(#[from] AuditError),

    #[error("{0}")]
    Control(#[from] WardenError),
}

/// Tunables for the control loop.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tick_period: Duration,
    /// How long a cached world snapshot stays fresh.
    pub world_ttl: Duration,
    pub stagnation: StagnationConfig,
    pub planner: PlannerConfig,
    pub agentic: AgenticConfig,
    /// Planner model connection; `None` keeps every run deterministic.
    pub llm: Option<LlmSettings>,
    /// Drop a run's hub channel once it reaches a terminal status.
    pub close_channel_on_terminal: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            world_ttl: Duration::from_secs(1),
            stagnation: StagnationConfig::default(),
            planner: PlannerConfig::default(),
            agentic: AgenticConfig::default(),
            llm: None,
            close_channel_on_terminal: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct RunHandle {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RunService
// ─────────────────────────────────────────────────────────────────────────────

/// Owns run lifecycle, the task registry, and the control loops.
pub struct RunService<S: SimClient + 'static> {
    store: Arc<ControlStore>,
    log: Arc<EventLog>,
    hub: Arc<RunHub>,
    sim: Arc<S>,
    engine: Arc<PolicyEngine>,
    config: RuntimeConfig,
    registry: Mutex<HashMap<String, RunHandle>>,
    plans: Mutex<HashMap<String, Vec<Waypoint>>>,
}

impl<S: SimClient + 'static> RunService<S> {
    pub fn new(
        store: Arc<ControlStore>,
        log: Arc<EventLog>,
        hub: Arc<RunHub>,
        sim: Arc<S>,
        engine: Arc<PolicyEngine>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            log,
            hub,
            sim,
            engine,
            config,
            registry: Mutex::new(HashMap::new()),
            plans: Mutex::new(HashMap::new()),
        })
    }

    fn registry_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunHandle>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn plans_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Waypoint>>> {
        self.plans.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Create the run row, mark the mission active, and spawn the loop.
    pub fn start_run(self: &Arc<Self>, mission_id: &str) -> Result<Run, WardenError> {
        self.store
            .get_mission(mission_id)
            .map_err(|e| WardenError::Audit(e.to_string()))?
            .ok_or_else(|| WardenError::MissionNotFound(mission_id.to_string()))?;
        self.store
            .set_mission_status(mission_id, MissionStatus::Active)?;
        let run = self
            .store
            .create_run(mission_id)
            .map_err(|e| WardenError::Audit(e.to_string()))?;
        self.launch_loop(run.id.clone());
        Ok(run)
    }

    /// Request an orderly stop: the loop observes the flag within one tick,
    /// commits `stopped`, and broadcasts the status itself. When no loop is
    /// alive (e.g. after a crash) the transition is committed directly.
    pub fn stop_run(&self, run_id: &str) -> Result<(), WardenError> {
        let signalled = {
            let registry = self.registry_lock();
            match registry.get(run_id) {
                Some(handle) if !handle.task.is_finished() => {
                    handle.stop.store(true, Ordering::SeqCst);
                    true
                }
                _ => false,
            }
        };
        if !signalled {
            let run = self
                .store
                .get_run(run_id)
                .map_err(|e| WardenError::Audit(e.to_string()))?
                .ok_or_else(|| WardenError::RunNotFound(run_id.to_string()))?;
            if run.status == RunStatus::Running {
                self.store.set_run_status(run_id, RunStatus::Stopped)?;
                self.hub.publish(run_id, HubMessage::status(RunStatus::Stopped));
            }
        }
        Ok(())
    }

    /// Pause or resume a mission's live runs. A paused loop keeps polling
    /// and broadcasting telemetry but proposes nothing.
    pub fn set_mission_paused(
        &self,
        mission_id: &str,
        paused: bool,
    ) -> Result<Mission, WardenError> {
        let status = if paused {
            MissionStatus::Paused
        } else {
            MissionStatus::Active
        };
        let mission = self.store.set_mission_status(mission_id, status)?;
        let running = self
            .store
            .list_runs_with_status(RunStatus::Running)
            .map_err(|e| WardenError::Audit(e.to_string()))?;
        let registry = self.registry_lock();
        for run in running.iter().filter(|r| r.mission_id == mission_id) {
            if let Some(handle) = registry.get(&run.id) {
                handle.paused.store(paused, Ordering::SeqCst);
            }
        }
        Ok(mission)
    }

    /// Relaunch loops for every `running` row without a live task, and
    /// rehydrate their attached plans from the latest PLAN event. Call once
    /// at process startup.
    pub fn auto_resume(self: &Arc<Self>) -> Result<usize, WardenError> {
        let running = self
            .store
            .list_runs_with_status(RunStatus::Running)
            .map_err(|e| WardenError::Audit(e.to_string()))?;
        let mut resumed = 0;
        for run in running {
            self.rehydrate_plan(&run.id);
            let absent = {
                let registry = self.registry_lock();
                !matches!(registry.get(&run.id), Some(h) if !h.task.is_finished())
            };
            if absent {
                tracing::info!(run_id = %run.id, "auto-resuming stale run loop");
                self.launch_loop(run.id);
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// `true` while the run has a live loop task.
    pub fn is_running(&self, run_id: &str) -> bool {
        let registry = self.registry_lock();
        matches!(registry.get(run_id), Some(h) if !h.task.is_finished())
    }

    fn launch_loop(self: &Arc<Self>, run_id: String) {
        let mut registry = self.registry_lock();
        if let Some(handle) = registry.get(&run_id) {
            if !handle.task.is_finished() {
                return; // one live task per run
            }
        }
        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let service = Arc::clone(self);
        let task = tokio::spawn(service.run_loop(
            run_id.clone(),
            Arc::clone(&stop),
            Arc::clone(&paused),
        ));
        registry.insert(run_id, RunHandle { stop, paused, task });
        tracing::info!("launched run loop task");
    }

    fn reap(&self, run_id: &str) {
        self.registry_lock().remove(run_id);
        self.plans_lock().remove(run_id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Plans
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach an explicit waypoint plan; the loop follows it head-first,
    /// popping waypoints as they execute.
    pub fn attach_plan(&self, run_id: &str, waypoints: Vec<Waypoint>) {
        if waypoints.is_empty() {
            return;
        }
        self.plans_lock().insert(run_id.to_string(), waypoints);
    }

    /// The waypoints the run still intends to visit, if a plan is attached.
    pub fn plan_preview(&self, run_id: &str) -> Option<Vec<Waypoint>> {
        self.plans_lock().get(run_id).cloned()
    }

    fn rehydrate_plan(&self, run_id: &str) {
        let plan_event = match self.log.last_of_type(run_id, EventType::Plan) {
            Ok(Some(event)) => event,
            _ => return,
        };
        let waypoints: Vec<Waypoint> =
            match serde_json::from_value(plan_event.payload["waypoints"].clone()) {
                Ok(wps) => wps,
                Err(_) => return,
            };
        if !waypoints.is_empty() {
            tracing::info!(run_id, count = waypoints.len(), "rehydrated plan");
            self.attach_plan(run_id, waypoints);
        }
    }

    fn pop_plan_head(&self, run_id: &str) {
        let mut plans = self.plans_lock();
        if let Some(waypoints) = plans.get_mut(run_id) {
            if !waypoints.is_empty() {
                waypoints.remove(0);
            }
            if waypoints.is_empty() {
                plans.remove(run_id);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // The loop
    // ─────────────────────────────────────────────────────────────────────────

    async fn run_loop(
        self: Arc<Self>,
        run_id: String,
        stop: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
    ) {
        tracing::info!(run_id = %run_id, "run loop started");
        if let Err(error) = self.drive(&run_id, &stop, &paused).await {
            self.fail_run(&run_id, &error);
        }
        self.reap(&run_id);
        if self.config.close_channel_on_terminal {
            self.hub.remove_run(&run_id);
        }
        tracing::info!(run_id = %run_id, "run loop ended");
    }

    async fn drive(
        &self,
        run_id: &str,
        stop: &AtomicBool,
        paused: &AtomicBool,
    ) -> Result<(), RunError> {
        let run = self
            .store
            .get_run(run_id)
            .map_err(|e| WardenError::Audit(e.to_string()))?
            .ok_or_else(|| WardenError::RunNotFound(run_id.to_string()))?;
        let mission = self
            .store
            .get_mission(&run.mission_id)
            .map_err(|e| WardenError::Audit(e.to_string()))?
            .ok_or_else(|| WardenError::MissionNotFound(run.mission_id.clone()))?;
        let goal = mission.goal;

        let mut agent = AgentRouter::new(
            self.config.planner.clone(),
            self.config.agentic.clone(),
            self.config.llm.as_ref().map(LlmSettings::build),
        );
        let mut stagnation = StagnationTracker::new(self.config.stagnation);
        let mut last_governance: Option<GovernanceDecision> = None;
        let mut world_cache: Option<(Instant, World)> = None;

        loop {
            if stop.load(Ordering::SeqCst) {
                return self.finish(run_id, RunStatus::Stopped);
            }
            // The row is the source of truth; an external transition ends
            // the loop without another broadcast.
            let current = self
                .store
                .get_run(run_id)
                .map_err(|e| WardenError::Audit(e.to_string()))?
                .ok_or_else(|| WardenError::RunNotFound(run_id.to_string()))?;
            if current.status != RunStatus::Running {
                return Ok(());
            }

            let telemetry = match self.sim.get_telemetry().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "telemetry fetch failed; skipping tick");
                    self.hub.publish(
                        run_id,
                        HubMessage::alert(json!({"kind": "sim_error", "error": e.to_string()})),
                    );
                    tokio::time::sleep(self.config.tick_period).await;
                    continue;
                }
            };

            let world_stale = world_cache
                .as_ref()
                .map(|(at, _)| at.elapsed() >= self.config.world_ttl)
                .unwrap_or(true);
            if world_stale {
                if let Ok(world) = self.sim.get_world().await {
                    world_cache = Some((Instant::now(), world));
                }
            }
            let world = world_cache.as_ref().map(|(_, w)| w);

            self.hub.publish(
                run_id,
                HubMessage::new(
                    MessageKind::Telemetry,
                    serde_json::to_value(&telemetry).unwrap_or_default(),
                ),
            );
            for event in &telemetry.events {
                self.hub
                    .publish(run_id, HubMessage::alert(json!({"event": event})));
            }

            if paused.load(Ordering::SeqCst) {
                tokio::time::sleep(self.config.tick_period).await;
                continue;
            }

            // An attached plan outranks the planner: follow it head-first.
            let planned = self
                .plans_lock()
                .get(run_id)
                .and_then(|wps| wps.first().copied());
            let proposal = match planned {
                Some(wp) => ActionProposal::move_to(
                    wp.x,
                    wp.y,
                    wp.max_speed,
                    "Following attached plan waypoint.",
                ),
                None => {
                    agent
                        .propose(
                            &self.engine,
                            &telemetry,
                            goal,
                            &mission.title,
                            last_governance.as_ref(),
                            world,
                        )
                        .await
                }
            };

            let decision = self.engine.evaluate_failsafe(&telemetry, &proposal, world);

            self.log.append(
                run_id,
                EventType::Decision,
                &json!({
                    "context": {
                        "telemetry": &telemetry,
                        "mission_goal": {"x": goal.x, "y": goal.y},
                    },
                    "proposal": &proposal,
                    "governance": &decision,
                }),
            )?;

            let mut executed = false;
            if decision.is_approved() {
                match self.sim.send_command(&proposal).await {
                    Ok(result) => {
                        self.log.append(
                            run_id,
                            EventType::Execution,
                            &json!({"command": &proposal, "result": &result}),
                        )?;
                        executed = true;
                        if planned.is_some() {
                            self.pop_plan_head(run_id);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(run_id, error = %e, "approved command failed to send");
                        self.hub.publish(
                            run_id,
                            HubMessage::alert(
                                json!({"kind": "command_error", "error": e.to_string()}),
                            ),
                        );
                    }
                }
            }

            agent.record_outcome(&proposal, &decision, executed);

            if executed {
                let distance = telemetry.position().distance_to(&goal);
                if stagnation.record(distance) {
                    self.log.append(
                        run_id,
                        EventType::Stagnation,
                        &json!({
                            "distance_to_goal": distance,
                            "stagnant_cycles": self.config.stagnation.cycles,
                        }),
                    )?;
                    self.hub.publish(
                        run_id,
                        HubMessage::alert(
                            json!({"kind": "stagnation", "distance_to_goal": distance}),
                        ),
                    );
                }
            }

            let chain = agent.last_thought_chain();
            if !chain.is_empty() {
                self.hub.publish(
                    run_id,
                    HubMessage::new(
                        MessageKind::AgentReasoning,
                        json!({"steps": chain, "total_steps": chain.len()}),
                    ),
                );
            }

            self.hub.publish(
                run_id,
                HubMessage::new(
                    MessageKind::Event,
                    json!({
                        "type": "DECISION",
                        "proposal": &proposal,
                        "governance": &decision,
                        "executed": executed,
                        "policy_state": decision.policy_state,
                    }),
                ),
            );

            let completed = proposal.action == ActionIntent::Stop && decision.is_approved();
            last_governance = Some(decision);

            if completed {
                let _ = self
                    .store
                    .set_mission_status(&run.mission_id, MissionStatus::Completed);
                return self.finish(run_id, RunStatus::Completed);
            }

            tokio::time::sleep(self.config.tick_period).await;
        }
    }

    /// Seal a run: verify the chain, commit the terminal status, broadcast.
    /// A broken chain overrides the requested status with `failed`.
    fn finish(&self, run_id: &str, status: RunStatus) -> Result<(), RunError> {
        let report = self.log.verify(run_id)?;
        if !report.ok {
            tracing::error!(run_id, break_at = ?report.break_at, "chain of trust broken");
            self.log.append(
                run_id,
                EventType::Alert,
                &json!({"kind": "chain_break", "at": report.break_at}),
            )?;
            self.store.set_run_status(run_id, RunStatus::Failed)?;
            self.hub.publish(run_id, HubMessage::status(RunStatus::Failed));
            return Ok(());
        }
        self.store.set_run_status(run_id, status)?;
        self.hub.publish(run_id, HubMessage::status(status));
        Ok(())
    }

    fn fail_run(&self, run_id: &str, error: &RunError) {
        tracing::error!(run_id, error = %error, "run loop crashed");
        let _ = self.log.append(
            run_id,
            EventType::Alert,
            &json!({"kind": "loop_error", "error": error.to_string()}),
        );
        let _ = self.store.set_run_status(run_id, RunStatus::Failed);
        self.hub.publish(run_id, HubMessage::status(RunStatus::Failed));
    }
}
