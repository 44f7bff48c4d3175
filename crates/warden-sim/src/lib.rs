//! `warden-sim` – Simulator Adapter
//!
//! The governance layer never talks to robot hardware; it talks to a
//! simulator (or a hardware bridge that looks like one) over HTTP:
//!
//! | Method | Path         | Purpose                          |
//! |--------|--------------|----------------------------------|
//! | GET    | `/telemetry` | current telemetry snapshot       |
//! | GET    | `/world`     | static world definition          |
//! | POST   | `/command`   | execute an approved action       |
//! | POST   | `/scenario`  | inject a named demo scenario     |
//!
//! All calls are idempotent except `/command`; per-run command ordering is
//! the caller's job (the run loop is the single writer for its run). The
//! [`SimClient`] trait is the seam that lets the runtime run against an
//! in-memory fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_types::{ActionProposal, Telemetry, World};

/// Header carrying the shared simulator token, when one is configured.
pub const SIM_TOKEN_HEADER: &str = "X-Sim-Token";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from simulator calls.
#[derive(Error, Debug)]
pub enum SimError {
    /// Transport failure or timeout; the caller should skip the tick.
    #[error("simulator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The simulator answered with something outside the contract.
    #[error("simulator protocol mismatch: {0}")]
    Protocol(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

/// Simulator's answer to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    intent: &'a str,
    params: serde_json::Value,
}

#[derive(Serialize)]
struct ScenarioRequest<'a> {
    scenario: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// SimClient trait
// ─────────────────────────────────────────────────────────────────────────────

/// What the run loop and decision facade need from a simulator.
#[async_trait]
pub trait SimClient: Send + Sync {
    async fn get_telemetry(&self) -> Result<Telemetry, SimError>;
    async fn get_world(&self) -> Result<World, SimError>;
    async fn send_command(&self, proposal: &ActionProposal) -> Result<CommandResult, SimError>;
    async fn trigger_scenario(&self, name: &str) -> Result<(), SimError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SimAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the HTTP adapter.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub telemetry_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            token: None,
            telemetry_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(2),
        }
    }
}

/// The production [`SimClient`]: a thin `reqwest` wrapper with per-call
/// timeouts and a shared connection pool.
pub struct SimAdapter {
    config: SimConfig,
    client: reqwest::Client,
}

impl SimAdapter {
    pub fn new(config: SimConfig) -> Self {
        let client = reqwest::Client::new();
        Self {
            config: SimConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
        }
    }

    fn get(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(format!("{}{path}", self.config.base_url))
            .timeout(timeout);
        if let Some(token) = &self.config.token {
            req = req.header(SIM_TOKEN_HEADER, token);
        }
        req
    }

    fn post(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}{path}", self.config.base_url))
            .timeout(timeout);
        if let Some(token) = &self.config.token {
            req = req.header(SIM_TOKEN_HEADER, token);
        }
        req
    }
}

#[async_trait]
impl SimClient for SimAdapter {
    async fn get_telemetry(&self) -> Result<Telemetry, SimError> {
        let response = self
            .get("/telemetry", self.config.telemetry_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SimError::Protocol(format!("telemetry: {e}")))
    }

    async fn get_world(&self) -> Result<World, SimError> {
        let response = self
            .get("/world", self.config.telemetry_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SimError::Protocol(format!("world: {e}")))
    }

    async fn send_command(&self, proposal: &ActionProposal) -> Result<CommandResult, SimError> {
        // The command wire shape carries only intent + params; the rationale
        // stays in the audit trail.
        let params = match serde_json::to_value(proposal) {
            Ok(serde_json::Value::Object(map)) => {
                map.get("params").cloned().unwrap_or(serde_json::json!({}))
            }
            _ => serde_json::json!({}),
        };
        let body = CommandRequest {
            intent: proposal.action.name(),
            params,
        };
        let response = self
            .post("/command", self.config.command_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| SimError::Protocol(format!("command: {e}")))
    }

    async fn trigger_scenario(&self, name: &str) -> Result<(), SimError> {
        self.post("/scenario", self.config.command_timeout)
            .json(&ScenarioRequest { scenario: name })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
