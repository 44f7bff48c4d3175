//! Shared application state handed to every route handler.

use std::sync::Arc;

use warden_audit::{ControlStore, EventLog};
use warden_hub::RunHub;
use warden_policy::PolicyEngine;
use warden_runtime::{DecisionFacade, RunService};
use warden_sim::SimAdapter;

use crate::config::ServerConfig;

/// Everything the HTTP/WS layer needs, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ControlStore>,
    pub log: Arc<EventLog>,
    pub hub: Arc<RunHub>,
    pub sim: Arc<SimAdapter>,
    pub engine: Arc<PolicyEngine>,
    pub runs: Arc<RunService<SimAdapter>>,
    pub facade: Arc<DecisionFacade<SimAdapter>>,
    pub planner_enabled: bool,
    pub keep_open_after_terminal: bool,
}

impl AppState {
    /// Wire every component from a resolved configuration and an opened
    /// store/log pair.
    pub fn build(
        config: &ServerConfig,
        store: Arc<ControlStore>,
        log: Arc<EventLog>,
    ) -> Self {
        let hub = Arc::new(RunHub::new(config.subscriber_buffer, config.slow_sub_evict));
        let sim = Arc::new(SimAdapter::new(config.sim_config()));
        let engine = Arc::new(PolicyEngine::new(config.policy_config()));
        let runs = RunService::new(
            Arc::clone(&store),
            Arc::clone(&log),
            Arc::clone(&hub),
            Arc::clone(&sim),
            Arc::clone(&engine),
            config.runtime_config(),
        );
        let facade = Arc::new(DecisionFacade::new(
            Arc::clone(&store),
            Arc::clone(&log),
            Arc::clone(&sim),
            Arc::clone(&engine),
            config.planner_config(),
            config.agentic_config(),
            config.llm_settings(),
        ));
        Self {
            store,
            log,
            hub,
            sim,
            engine,
            runs,
            facade,
            planner_enabled: config.planner_enabled,
            keep_open_after_terminal: config.keep_open_after_terminal,
        }
    }
}
