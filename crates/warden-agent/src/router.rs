//! [`AgentRouter`] – mode selection between the deterministic planner and
//! the agentic reasoning loop.
//!
//! The run loop talks to one object per run. When a planner model is
//! configured the router runs the full agentic loop and keeps the resulting
//! thought chain for the live `agent_reasoning` stream; otherwise it asks
//! the deterministic planner directly and the chain is empty.

use warden_policy::PolicyEngine;
use warden_types::{ActionProposal, GovernanceDecision, Point, Telemetry, World};

use crate::agentic::{AgenticAgent, AgenticConfig, ThoughtStep};
use crate::llm::LlmDriver;
use crate::memory::MemorySummary;
use crate::planner::{Planner, PlannerConfig};

/// Per-run agent facade.
pub struct AgentRouter {
    agentic: AgenticAgent,
    llm: Option<LlmDriver>,
    last_thought_chain: Vec<ThoughtStep>,
}

impl AgentRouter {
    pub fn new(
        planner_config: PlannerConfig,
        agentic_config: AgenticConfig,
        llm: Option<LlmDriver>,
    ) -> Self {
        Self {
            agentic: AgenticAgent::new(agentic_config, Planner::new(planner_config)),
            llm,
            last_thought_chain: Vec::new(),
        }
    }

    /// Produce the next proposal for a tick.
    pub async fn propose(
        &mut self,
        engine: &PolicyEngine,
        telemetry: &Telemetry,
        goal: Point,
        nl_task: &str,
        last_governance: Option<&GovernanceDecision>,
        world: Option<&World>,
    ) -> ActionProposal {
        match &self.llm {
            Some(driver) => {
                let outcome = self
                    .agentic
                    .run(engine, Some(driver), telemetry, goal, nl_task, world)
                    .await;
                self.last_thought_chain = outcome.thought_chain;
                outcome.proposal
            }
            None => {
                self.last_thought_chain.clear();
                self.agentic
                    .planner_mut()
                    .propose(telemetry, goal, last_governance, world)
            }
        }
    }

    /// Feed the governed outcome back into agent memory.
    pub fn record_outcome(
        &mut self,
        proposal: &ActionProposal,
        governance: &GovernanceDecision,
        executed: bool,
    ) {
        self.agentic.record_outcome(proposal, governance, executed);
    }

    /// The reasoning chain behind the most recent agentic proposal; empty in
    /// deterministic mode.
    pub fn last_thought_chain(&self) -> &[ThoughtStep] {
        &self.last_thought_chain
    }

    pub fn memory_summary(&self) -> MemorySummary {
        self.agentic.memory().summary()
    }
}
