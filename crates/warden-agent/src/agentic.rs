//! The agentic reasoning loop: bounded tool use with memory and replanning.
//!
//! The agent advances through a closed tool set (`assess_environment`,
//! `check_policy`, `submit_action`, `replan`, `graceful_stop`) for at most
//! `max_steps` calls and `wall_ms` of wall clock. Three consecutive denials
//! in memory force a graceful stop before any reasoning happens.
//!
//! When an LLM is configured it is asked for the whole reasoning script as a
//! JSON array of `{thought, action, action_input}` steps, which are executed
//! server-side against the live policy engine. Without a model, or on any
//! model failure, a deterministic script runs instead: assess, check the
//! planner's candidate, apply the policy feedback once, then submit or stop
//! gracefully. Either way the full thought chain is returned for the audit
//! stream.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warden_policy::PolicyEngine;
use warden_types::{ActionProposal, GovernanceDecision, Point, PolicyState, Telemetry, World};

use crate::llm::{extract_json, ChatMessage, LlmDriver, Role};
use crate::memory::{AgentMemory, MemorySummary};
use crate::planner::Planner;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration & outcome types
// ─────────────────────────────────────────────────────────────────────────────

/// Bounds on one agentic call.
#[derive(Debug, Clone)]
pub struct AgenticConfig {
    pub max_steps: usize,
    pub wall_ms: u64,
    /// Consecutive denials that force a graceful stop.
    pub denial_stop_threshold: usize,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            max_steps: 6,
            wall_ms: 5_000,
            denial_stop_threshold: 3,
        }
    }
}

/// One executed step of the reasoning chain.
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtStep {
    pub step_number: usize,
    pub thought: String,
    pub action: String,
    pub action_input: Value,
    pub observation: Option<String>,
}

/// The step shape the model is asked to emit.
#[derive(Debug, Clone, Deserialize)]
struct RawStep {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    action_input: Value,
}

/// What one agentic call produced.
#[derive(Debug, Clone, Serialize)]
pub struct AgenticOutcome {
    pub proposal: ActionProposal,
    pub governance: GovernanceDecision,
    pub thought_chain: Vec<ThoughtStep>,
    pub memory_summary: MemorySummary,
    pub replanning_used: bool,
    pub model_used: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// AgenticAgent
// ─────────────────────────────────────────────────────────────────────────────

/// The bounded reasoning agent. Owns the deterministic planner it falls back
/// to and the decision memory shared across calls.
pub struct AgenticAgent {
    config: AgenticConfig,
    planner: Planner,
    memory: AgentMemory,
}

impl AgenticAgent {
    pub fn new(config: AgenticConfig, planner: Planner) -> Self {
        Self {
            config,
            planner,
            memory: AgentMemory::new(),
        }
    }

    pub fn planner_mut(&mut self) -> &mut Planner {
        &mut self.planner
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Record a (proposal, decision) outcome into the ring.
    pub fn record_outcome(
        &mut self,
        proposal: &ActionProposal,
        governance: &GovernanceDecision,
        executed: bool,
    ) {
        self.memory.record(proposal, governance, executed);
    }

    /// Run one bounded agentic call.
    pub async fn run(
        &mut self,
        engine: &PolicyEngine,
        llm: Option<&LlmDriver>,
        telemetry: &Telemetry,
        goal: Point,
        nl_task: &str,
        world: Option<&World>,
    ) -> AgenticOutcome {
        let started = Instant::now();
        let mut chain: Vec<ThoughtStep> = Vec::new();

        // Repeated denials: stop reasoning, stop moving.
        if self.memory.consecutive_denials() >= self.config.denial_stop_threshold {
            let reasons = self.memory.last_denial_reasons().join("; ");
            let proposal = self.push_graceful_stop(
                &mut chain,
                format!(
                    "{} consecutive denials; forcing a graceful stop. Last reasons: {reasons}",
                    self.memory.consecutive_denials()
                ),
                PolicyState::Stop,
            );
            let governance = engine.evaluate_failsafe(telemetry, &proposal, world);
            return self.outcome(proposal, governance, chain, false, "deterministic");
        }

        if let Some(driver) = llm {
            match self
                .run_llm_script(driver, engine, telemetry, goal, nl_task, world, &mut chain, started)
                .await
            {
                Some((proposal, replanned)) => {
                    let governance = engine.evaluate_failsafe(telemetry, &proposal, world);
                    return self.outcome(proposal, governance, chain, replanned, driver.model());
                }
                None => {
                    tracing::warn!("agentic model path produced no action; using deterministic script");
                }
            }
        }

        let (proposal, replanned) =
            self.run_deterministic_script(engine, telemetry, goal, world, &mut chain, started);
        let governance = engine.evaluate_failsafe(telemetry, &proposal, world);
        self.outcome(proposal, governance, chain, replanned, "deterministic")
    }

    fn outcome(
        &self,
        proposal: ActionProposal,
        governance: GovernanceDecision,
        thought_chain: Vec<ThoughtStep>,
        replanning_used: bool,
        model_used: &str,
    ) -> AgenticOutcome {
        AgenticOutcome {
            proposal,
            governance,
            thought_chain,
            memory_summary: self.memory.summary(),
            replanning_used,
            model_used: model_used.to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Deterministic script
    // ─────────────────────────────────────────────────────────────────────────

    fn run_deterministic_script(
        &mut self,
        engine: &PolicyEngine,
        telemetry: &Telemetry,
        goal: Point,
        world: Option<&World>,
        chain: &mut Vec<ThoughtStep>,
        started: Instant,
    ) -> (ActionProposal, bool) {
        push_step(
            chain,
            "Survey the environment before choosing an action.",
            "assess_environment",
            json!({}),
            Some(assess_environment(telemetry, world)),
        );

        let candidate = self.planner.propose(telemetry, goal, None, world);
        let decision = engine.evaluate_failsafe(telemetry, &candidate, world);
        push_step(
            chain,
            "Pre-check the direct candidate against policy.",
            "check_policy",
            serde_json::to_value(&candidate).unwrap_or_default(),
            Some(describe_decision(&decision)),
        );

        if decision.is_approved() {
            let proposal = self.push_submit(chain, candidate);
            return (proposal, false);
        }

        if self.out_of_budget(chain.len(), started) {
            let proposal = self.push_graceful_stop(
                chain,
                "Step or time budget exhausted before an approved action.".to_string(),
                decision.policy_state,
            );
            return (proposal, false);
        }

        // One feedback-driven revision: the planner already knows how to
        // react to SLOW / STOP / REPLAN states.
        let hint = decision
            .required_action
            .clone()
            .unwrap_or_else(|| decision.reasons.join("; "));
        push_step(
            chain,
            "Candidate was rejected; revise it using the policy feedback.",
            "replan",
            json!({ "hint": hint }),
            Some("Generating a revised candidate.".to_string()),
        );

        let revised = self.planner.propose(telemetry, goal, Some(&decision), world);
        let revised_decision = engine.evaluate_failsafe(telemetry, &revised, world);
        push_step(
            chain,
            "Pre-check the revised candidate.",
            "check_policy",
            serde_json::to_value(&revised).unwrap_or_default(),
            Some(describe_decision(&revised_decision)),
        );

        if revised_decision.is_approved() {
            let proposal = self.push_submit(chain, revised);
            (proposal, true)
        } else {
            let proposal = self.push_graceful_stop(
                chain,
                "Revised candidate still rejected; stopping gracefully.".to_string(),
                revised_decision.policy_state,
            );
            (proposal, true)
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // LLM script
    // ─────────────────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_llm_script(
        &mut self,
        driver: &LlmDriver,
        engine: &PolicyEngine,
        telemetry: &Telemetry,
        goal: Point,
        nl_task: &str,
        world: Option<&World>,
        chain: &mut Vec<ThoughtStep>,
        started: Instant,
    ) -> Option<(ActionProposal, bool)> {
        let prompt = self.build_prompt(telemetry, goal, nl_task, world);
        let messages = [ChatMessage {
            role: Role::User,
            content: prompt,
        }];
        let text = driver.complete(&messages).await.ok()?;
        let value = extract_json(&text).ok()?;
        let raw_steps: Vec<RawStep> = match value {
            Value::Array(_) => serde_json::from_value(value).ok()?,
            obj @ Value::Object(_) => vec![serde_json::from_value(obj).ok()?],
            _ => return None,
        };

        let mut replanned = false;
        for raw in raw_steps {
            if self.out_of_budget(chain.len(), started) {
                let proposal = self.push_graceful_stop(
                    chain,
                    "Step or time budget exhausted mid-script.".to_string(),
                    PolicyState::Stop,
                );
                return Some((proposal, replanned));
            }
            match raw.action.as_str() {
                "assess_environment" => {
                    push_step(
                        chain,
                        &raw.thought,
                        "assess_environment",
                        json!({}),
                        Some(assess_environment(telemetry, world)),
                    );
                }
                "check_policy" => {
                    let candidate = proposal_from_input(&raw.action_input, goal);
                    let decision = engine.evaluate_failsafe(telemetry, &candidate, world);
                    push_step(
                        chain,
                        &raw.thought,
                        "check_policy",
                        raw.action_input,
                        Some(describe_decision(&decision)),
                    );
                }
                "submit_action" => {
                    let proposal = proposal_from_input(&raw.action_input, goal);
                    push_step(
                        chain,
                        &raw.thought,
                        "submit_action",
                        raw.action_input,
                        Some(format!("Action submitted: {}", proposal.action.name())),
                    );
                    return Some((proposal, replanned));
                }
                "replan" => {
                    replanned = true;
                    push_step(
                        chain,
                        &raw.thought,
                        "replan",
                        raw.action_input,
                        Some("Denial noted; next step must produce a new candidate.".to_string()),
                    );
                }
                "graceful_stop" => {
                    let reason = raw.action_input["reason"]
                        .as_str()
                        .unwrap_or("model requested a stop")
                        .to_string();
                    let proposal = self.push_graceful_stop(chain, reason, PolicyState::Stop);
                    return Some((proposal, replanned));
                }
                other => {
                    push_step(
                        chain,
                        &raw.thought,
                        other,
                        raw.action_input,
                        Some(format!("Unknown tool: {other}")),
                    );
                }
            }
        }
        // Script ended without submitting.
        None
    }

    fn build_prompt(
        &self,
        telemetry: &Telemetry,
        goal: Point,
        nl_task: &str,
        world: Option<&World>,
    ) -> String {
        format!(
            "You are the reasoning layer of a governed warehouse robot.\n\
             TASK: {nl_task}\n\
             GOAL: ({:.1}, {:.1})\n\
             STATE:\n{}\n\
             MEMORY:\n{}\n\
             TOOLS: assess_environment {{}}, check_policy {{intent, x, y, max_speed}}, \
             submit_action {{intent, x, y, max_speed, rationale}}, replan {{hint}}, \
             graceful_stop {{reason}}.\n\
             RULES: always check_policy before submit_action for MOVE_TO; at most {} steps; \
             end with submit_action or graceful_stop.\n\
             Respond with a JSON array of steps: \
             [{{\"thought\": \"...\", \"action\": \"...\", \"action_input\": {{...}}}}]",
            goal.x,
            goal.y,
            assess_environment(telemetry, world),
            self.memory.to_context(),
            self.config.max_steps,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Step helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn out_of_budget(&self, steps_used: usize, started: Instant) -> bool {
        steps_used + 1 >= self.config.max_steps
            || started.elapsed().as_millis() as u64 >= self.config.wall_ms
    }

    fn push_submit(&self, chain: &mut Vec<ThoughtStep>, proposal: ActionProposal) -> ActionProposal {
        push_step(
            chain,
            "Candidate approved; submit it.",
            "submit_action",
            serde_json::to_value(&proposal).unwrap_or_default(),
            Some(format!("Action submitted: {}", proposal.action.name())),
        );
        proposal
    }

    fn push_graceful_stop(
        &self,
        chain: &mut Vec<ThoughtStep>,
        reason: String,
        state: PolicyState,
    ) -> ActionProposal {
        // A STOP-state hazard may clear on its own: hold with WAIT. Anything
        // else ends the approach outright.
        let proposal = if state == PolicyState::Stop {
            ActionProposal::wait(reason.clone())
        } else {
            ActionProposal::stop(reason.clone())
        };
        push_step(
            chain,
            &reason,
            "graceful_stop",
            json!({ "reason": reason }),
            Some(format!("Stopping gracefully with {}.", proposal.action.name())),
        );
        proposal
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool implementations (pure)
// ─────────────────────────────────────────────────────────────────────────────

fn push_step(
    chain: &mut Vec<ThoughtStep>,
    thought: &str,
    action: &str,
    action_input: Value,
    observation: Option<String>,
) {
    chain.push(ThoughtStep {
        step_number: chain.len() + 1,
        thought: thought.to_string(),
        action: action.to_string(),
        action_input,
        observation,
    });
}

/// Summarize telemetry and world hazards for prompts and observations.
fn assess_environment(telemetry: &Telemetry, world: Option<&World>) -> String {
    let mut parts = vec![
        format!(
            "Position ({:.2}, {:.2}) in zone {:?}, speed {:.2} m/s.",
            telemetry.x, telemetry.y, telemetry.zone, telemetry.speed
        ),
        if telemetry.human_detected {
            format!(
                "Human detected at {:.2} m (confidence {:.2}).",
                telemetry.human_distance_m, telemetry.human_conf
            )
        } else {
            "No human detected.".to_string()
        },
        format!("Nearest obstacle {:.2} m.", telemetry.nearest_obstacle_m),
    ];
    if let Some(battery) = telemetry.battery_percent {
        parts.push(format!("Battery {battery:.0}%."));
    }
    if let Some(world) = world {
        parts.push(format!(
            "Geofence x[{:.0}-{:.0}] y[{:.0}-{:.0}]; {} mapped obstacle(s).",
            world.geofence.min_x,
            world.geofence.max_x,
            world.geofence.min_y,
            world.geofence.max_y,
            world.obstacles.len()
        ));
    }
    parts.join(" ")
}

fn describe_decision(decision: &GovernanceDecision) -> String {
    let hits = if decision.policy_hits.is_empty() {
        "none".to_string()
    } else {
        decision.policy_hits.join(", ")
    };
    format!(
        "Decision: {:?}. State: {:?}. Hits: {hits}. Risk: {:.2}.{}",
        decision.decision,
        decision.policy_state,
        decision.risk_score,
        decision
            .required_action
            .as_deref()
            .map(|a| format!(" Required: {a}."))
            .unwrap_or_default()
    )
}

/// Build a proposal from a model-supplied tool input, clamping the speed.
fn proposal_from_input(input: &Value, goal: Point) -> ActionProposal {
    let rationale = input["rationale"]
        .as_str()
        .unwrap_or("Agent-generated action")
        .to_string();
    match input["intent"].as_str().unwrap_or("MOVE_TO") {
        "STOP" => ActionProposal::stop(rationale),
        "WAIT" => ActionProposal::wait(rationale),
        "MODIFY_SPEED" => ActionProposal::modify_speed(
            input["max_speed"].as_f64().unwrap_or(0.3).clamp(0.1, 1.0),
            rationale,
        ),
        _ => ActionProposal::move_to(
            input["x"].as_f64().unwrap_or(goal.x),
            input["y"].as_f64().unwrap_or(goal.y),
            input["max_speed"].as_f64().unwrap_or(0.5).clamp(0.1, 1.0),
            rationale,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_policy::{PolicyConfig, PolicyEngine};
    use warden_types::{ActionIntent, Decision, Zone};

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

    fn agent() -> AgenticAgent {
        AgenticAgent::new(
            AgenticConfig::default(),
            Planner::new(crate::planner::PlannerConfig::default()),
        )
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    #[tokio::test]
    async fn clean_environment_submits_after_one_check() {
        let mut agent = agent();
        let outcome = agent
            .run(&engine(), None, &telemetry(0.0, 0.0), Point::new(10.0, 5.0), "go", None)
            .await;
        assert!(outcome.governance.is_approved());
        assert!(!outcome.replanning_used);
        assert_eq!(outcome.model_used, "deterministic");

        let actions: Vec<&str> = outcome.thought_chain.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["assess_environment", "check_policy", "submit_action"]);
        assert!(matches!(outcome.proposal.action, ActionIntent::MoveTo { .. }));
    }

    #[tokio::test]
    async fn thought_steps_are_numbered_from_one() {
        let mut agent = agent();
        let outcome = agent
            .run(&engine(), None, &telemetry(0.0, 0.0), Point::new(10.0, 5.0), "go", None)
            .await;
        for (i, step) in outcome.thought_chain.iter().enumerate() {
            assert_eq!(step.step_number, i + 1);
        }
    }

    #[tokio::test]
    async fn human_near_slow_radius_triggers_replan_then_approval() {
        let mut agent = agent();
        let mut tel = telemetry(0.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.4;
        let outcome = agent
            .run(&engine(), None, &tel, Point::new(10.0, 5.0), "go", None)
            .await;
        // First candidate (zone-clamped 0.5) trips HUMAN_PROX_02; the
        // revision applies the slow cap and passes.
        assert!(outcome.replanning_used);
        assert!(outcome.governance.is_approved());
        assert_eq!(outcome.proposal.action.max_speed(), Some(0.3));
        assert!(outcome
            .thought_chain
            .iter()
            .any(|s| s.action == "replan"));
    }

    #[tokio::test]
    async fn human_inside_stop_radius_ends_in_graceful_hold() {
        let mut agent = agent();
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 0.8;
        let outcome = agent
            .run(&engine(), None, &tel, Point::new(10.0, 5.0), "go", None)
            .await;
        assert!(outcome.replanning_used);
        // The WAIT hold is itself approvable.
        assert_eq!(outcome.proposal.action, ActionIntent::Wait);
        assert!(outcome.governance.is_approved());
    }

    #[tokio::test]
    async fn three_consecutive_denials_force_graceful_stop() {
        let mut agent = agent();
        let denied = GovernanceDecision {
            decision: Decision::Denied,
            policy_state: PolicyState::Stop,
            policy_hits: vec!["HUMAN_PROX_01".to_string()],
            reasons: vec!["human too close".to_string()],
            required_action: Some("halt".to_string()),
            risk_score: 0.9,
        };
        for _ in 0..3 {
            agent.record_outcome(&ActionProposal::move_to(1.0, 1.0, 0.5, ""), &denied, false);
        }

        let outcome = agent
            .run(&engine(), None, &telemetry(0.0, 0.0), Point::new(10.0, 5.0), "go", None)
            .await;
        assert_eq!(outcome.thought_chain.len(), 1);
        assert_eq!(outcome.thought_chain[0].action, "graceful_stop");
        assert!(!outcome.proposal.action.is_movement());
        assert_eq!(outcome.memory_summary.denial_count, 3);
    }

    #[tokio::test]
    async fn chain_respects_step_budget() {
        let mut agent = AgenticAgent::new(
            AgenticConfig {
                max_steps: 6,
                ..AgenticConfig::default()
            },
            Planner::new(crate::planner::PlannerConfig::default()),
        );
        let mut tel = telemetry(5.0, 5.0);
        tel.human_detected = true;
        tel.human_distance_m = 0.8;
        let outcome = agent
            .run(&engine(), None, &tel, Point::new(10.0, 5.0), "go", None)
            .await;
        assert!(outcome.thought_chain.len() <= 6);
    }

    #[test]
    fn proposal_from_input_clamps_speed() {
        let input = json!({"intent": "MOVE_TO", "x": 5.0, "y": 5.0, "max_speed": 9.0});
        let prop = proposal_from_input(&input, Point::new(0.0, 0.0));
        assert_eq!(prop.action.max_speed(), Some(1.0));
    }

    #[test]
    fn proposal_from_input_defaults_to_goal() {
        let input = json!({"intent": "MOVE_TO"});
        let prop = proposal_from_input(&input, Point::new(7.0, 3.0));
        assert_eq!(prop.action.target(), Some(Point::new(7.0, 3.0)));
    }

    #[test]
    fn assess_mentions_human_and_obstacles() {
        let mut tel = telemetry(1.0, 2.0);
        tel.human_detected = true;
        tel.human_distance_m = 2.0;
        let text = assess_environment(&tel, None);
        assert!(text.contains("Human detected at 2.00 m"));
    }
}
