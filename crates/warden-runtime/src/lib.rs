//! `warden-runtime` – The Governed Control Loop
//!
//! Where the propose → govern → execute → append → broadcast cycle actually
//! runs. Each run owns one cooperative task; the policy engine has the final
//! word on every action, and everything the loop decides lands in the
//! hash-chained audit log before it is broadcast.
//!
//! # Modules
//!
//! - [`run_service`] – [`RunService`][run_service::RunService]: run
//!   lifecycle, the task registry (spawn / stop / reap / auto-resume), and
//!   the per-run control loop.
//! - [`stagnation`] – [`StagnationTracker`][stagnation::StagnationTracker]:
//!   flags sustained lack of progress toward the goal without aborting the
//!   run.
//! - [`facade`] – [`DecisionFacade`][facade::DecisionFacade]: synchronous
//!   policy-test / plan-generate / plan-execute / agentic-propose
//!   compositions that work without a running loop.

pub mod facade;
pub mod run_service;
pub mod stagnation;

pub use facade::{
    DecisionFacade, ExecutionStep, PlanExecuteResponse, PlanGenerateResponse, WaypointGovernance,
};
pub use run_service::{RunError, RunService, RuntimeConfig};
pub use stagnation::{StagnationConfig, StagnationTracker};
