//! `warden-agent` – The Proposal Side
//!
//! Everything that produces candidate actions for governance to judge. The
//! agent never touches the actuators: its output is always a proposal, and
//! the policy engine has the last word.
//!
//! # Modules
//!
//! - [`planner`] – [`Planner`][planner::Planner]: the deterministic per-tick
//!   planner (arrive / slow / wait / detour), plus path preview and
//!   multi-waypoint plan generation with a deterministic fallback.
//! - [`agentic`] – [`AgenticAgent`][agentic::AgenticAgent]: the bounded
//!   tool-use reasoning loop with decision memory and replanning.
//! - [`memory`] – [`AgentMemory`][memory::AgentMemory]: ring buffer of
//!   recent (proposal, decision) outcomes.
//! - [`llm`] – [`LlmDriver`][llm::LlmDriver]: async OpenAI-compatible chat
//!   client; all callers fall back deterministically on failure.
//! - [`router`] – [`AgentRouter`][router::AgentRouter]: per-run mode
//!   selection between deterministic and agentic proposing.

pub mod agentic;
pub mod llm;
pub mod memory;
pub mod planner;
pub mod router;

pub use agentic::{AgenticAgent, AgenticConfig, AgenticOutcome, ThoughtStep};
pub use llm::{ChatMessage, LlmDriver, LlmError, LlmSettings, Role};
pub use memory::{AgentMemory, MemorySummary};
pub use planner::{generate_plan, plan_route, GeneratedPlan, Planner, PlannerConfig, Waypoint};
pub use router::AgentRouter;
