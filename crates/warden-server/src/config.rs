//! Environment-driven configuration.
//!
//! Every tunable of the governance layer is an environment variable with a
//! safe default; an unset variable means "use the default", a malformed one
//! is a configuration error (the binary exits with code 1).
//!
//! | Variable | Default | Purpose |
//! |---|---|---|
//! | `BIND_ADDR` | `0.0.0.0:8080` | HTTP/WS listen address |
//! | `DATABASE_PATH` | `./data/warden.db` | SQLite file for rows + events |
//! | `TICK_PERIOD_MS` | `100` | control-loop tick period |
//! | `STOP_RADIUS_M` | `1.0` | human full-stop radius |
//! | `SLOW_RADIUS_M` | `3.0` | human slow radius |
//! | `SLOW_SPEED` | `0.3` | speed cap near humans |
//! | `DEFAULT_SPEED` | `0.8` | planner cruise speed |
//! | `ARRIVE_EPS` | `0.3` | goal arrival distance |
//! | `COLLISION_RADIUS` | `0.5` | obstacle denial radius |
//! | `RISK_WEIGHTS_HIGH/MEDIUM/LOW` | `0.5/0.25/0.1` | risk weights |
//! | `RISK_APPROVE_MAX` | `0.70` | review threshold |
//! | `RISK_DENY_MIN` | `0.95` | denial threshold |
//! | `SUBSCRIBER_BUFFER` | `64` | hub buffer per subscriber |
//! | `SLOW_SUB_EVICT` | `8` | dropped frames before eviction |
//! | `SIM_BASE_URL` | `http://localhost:8090` | simulator endpoint |
//! | `SIM_TOKEN` | unset | `X-Sim-Token` header value |
//! | `SIM_TIMEOUT_MS` | `1000` | telemetry timeout |
//! | `PLANNER_ENABLED` | `false` | use the LLM planner |
//! | `PLANNER_BASE_URL` | `http://localhost:11434` | model server |
//! | `PLANNER_MODEL` | `llama3` | model name |
//! | `PLANNER_API_KEY` | unset | bearer token for the model server |
//! | `PLANNER_TIMEOUT_MS` | `10000` | model call timeout |
//! | `AGENT_MAX_STEPS` | `6` | agentic step budget |
//! | `AGENT_WALL_MS` | `5000` | agentic wall-clock budget |
//! | `STAGNATION_CYCLES` | `30` | stagnant ticks before alert |
//! | `STAGNATION_EPS` | `0.02` | minimum per-tick progress |
//! | `STAGNATION_MIN_DIST` | `0.4` | no stagnation this close to goal |
//! | `KEEP_OPEN_AFTER_TERMINAL` | `false` | keep WS open after run end |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use warden_agent::{AgenticConfig, LlmSettings, PlannerConfig};
use warden_policy::{PolicyConfig, RiskWeights};
use warden_runtime::{RuntimeConfig, StagnationConfig};
use warden_sim::SimConfig;

/// A malformed environment variable.
#[derive(Error, Debug)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// The fully-resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,

    pub tick_period_ms: u64,
    pub stop_radius_m: f64,
    pub slow_radius_m: f64,
    pub slow_speed: f64,
    pub default_speed: f64,
    pub arrive_eps: f64,
    pub collision_radius: f64,

    pub risk_weight_high: f64,
    pub risk_weight_medium: f64,
    pub risk_weight_low: f64,
    pub risk_approve_max: f64,
    pub risk_deny_min: f64,

    pub subscriber_buffer: usize,
    pub slow_sub_evict: u64,

    pub sim_base_url: String,
    pub sim_token: Option<String>,
    pub sim_timeout_ms: u64,

    pub planner_enabled: bool,
    pub planner_base_url: String,
    pub planner_model: String,
    pub planner_api_key: Option<String>,
    pub planner_timeout_ms: u64,
    pub agent_max_steps: usize,
    pub agent_wall_ms: u64,

    pub stagnation_cycles: u32,
    pub stagnation_eps: f64,
    pub stagnation_min_dist: f64,

    pub keep_open_after_terminal: bool,
}

impl ServerConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_env("BIND_ADDR", "0.0.0.0:8080".parse().unwrap())?,
            database_path: PathBuf::from(
                std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/warden.db".to_string()),
            ),
            tick_period_ms: parse_env("TICK_PERIOD_MS", 100)?,
            stop_radius_m: parse_env("STOP_RADIUS_M", 1.0)?,
            slow_radius_m: parse_env("SLOW_RADIUS_M", 3.0)?,
            slow_speed: parse_env("SLOW_SPEED", 0.3)?,
            default_speed: parse_env("DEFAULT_SPEED", 0.8)?,
            arrive_eps: parse_env("ARRIVE_EPS", 0.3)?,
            collision_radius: parse_env("COLLISION_RADIUS", 0.5)?,
            risk_weight_high: parse_env("RISK_WEIGHTS_HIGH", 0.5)?,
            risk_weight_medium: parse_env("RISK_WEIGHTS_MEDIUM", 0.25)?,
            risk_weight_low: parse_env("RISK_WEIGHTS_LOW", 0.1)?,
            risk_approve_max: parse_env("RISK_APPROVE_MAX", 0.70)?,
            risk_deny_min: parse_env("RISK_DENY_MIN", 0.95)?,
            subscriber_buffer: parse_env("SUBSCRIBER_BUFFER", 64)?,
            slow_sub_evict: parse_env("SLOW_SUB_EVICT", 8)?,
            sim_base_url: std::env::var("SIM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8090".to_string()),
            sim_token: std::env::var("SIM_TOKEN").ok().filter(|t| !t.is_empty()),
            sim_timeout_ms: parse_env("SIM_TIMEOUT_MS", 1000)?,
            planner_enabled: parse_env("PLANNER_ENABLED", false)?,
            planner_base_url: std::env::var("PLANNER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            planner_model: std::env::var("PLANNER_MODEL").unwrap_or_else(|_| "llama3".to_string()),
            planner_api_key: std::env::var("PLANNER_API_KEY").ok().filter(|k| !k.is_empty()),
            planner_timeout_ms: parse_env("PLANNER_TIMEOUT_MS", 10_000)?,
            agent_max_steps: parse_env("AGENT_MAX_STEPS", 6)?,
            agent_wall_ms: parse_env("AGENT_WALL_MS", 5_000)?,
            stagnation_cycles: parse_env("STAGNATION_CYCLES", 30)?,
            stagnation_eps: parse_env("STAGNATION_EPS", 0.02)?,
            stagnation_min_dist: parse_env("STAGNATION_MIN_DIST", 0.4)?,
            keep_open_after_terminal: parse_env("KEEP_OPEN_AFTER_TERMINAL", false)?,
        })
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            stop_radius_m: self.stop_radius_m,
            slow_radius_m: self.slow_radius_m,
            slow_speed: self.slow_speed,
            collision_radius_m: self.collision_radius,
            weights: RiskWeights {
                high: self.risk_weight_high,
                medium: self.risk_weight_medium,
                low: self.risk_weight_low,
            },
            review_min: self.risk_approve_max,
            deny_min: self.risk_deny_min,
            ..PolicyConfig::default()
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            default_speed: self.default_speed,
            arrive_eps: self.arrive_eps,
            slow_speed: self.slow_speed,
            ..PlannerConfig::default()
        }
    }

    pub fn agentic_config(&self) -> AgenticConfig {
        AgenticConfig {
            max_steps: self.agent_max_steps,
            wall_ms: self.agent_wall_ms,
            ..AgenticConfig::default()
        }
    }

    pub fn llm_settings(&self) -> Option<LlmSettings> {
        self.planner_enabled.then(|| LlmSettings {
            base_url: self.planner_base_url.clone(),
            model: self.planner_model.clone(),
            api_key: self.planner_api_key.clone(),
            timeout: Duration::from_millis(self.planner_timeout_ms),
        })
    }

    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            base_url: self.sim_base_url.clone(),
            token: self.sim_token.clone(),
            telemetry_timeout: Duration::from_millis(self.sim_timeout_ms),
            command_timeout: Duration::from_millis(self.sim_timeout_ms * 2),
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            tick_period: Duration::from_millis(self.tick_period_ms),
            stagnation: StagnationConfig {
                eps: self.stagnation_eps,
                min_dist: self.stagnation_min_dist,
                cycles: self.stagnation_cycles,
            },
            planner: self.planner_config(),
            agentic: self.agentic_config(),
            llm: self.llm_settings(),
            close_channel_on_terminal: !self.keep_open_after_terminal,
            ..RuntimeConfig::default()
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when it
/// is unset. A present-but-unparsable value is an error, not a fallback.
fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError { name, value: raw }),
        Err(_) => Ok(default),
    }
}
