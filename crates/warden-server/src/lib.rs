//! `warden-server` – The Operator Surface
//!
//! REST + WebSocket server over the governance stack: mission CRUD, run
//! control, the policy catalog, the synchronous decision facade, and the
//! per-run live stream.
//!
//! # Modules
//!
//! - [`config`] – environment-variable configuration with exit-code
//!   semantics (0 ok, 1 config error, 2 startup failure).
//! - [`state`] – [`AppState`][state::AppState]: the wired component graph.
//! - [`routes`] – the REST route table and handlers.
//! - [`ws`] – the `/ws/runs/{run_id}` live stream.
//! - [`logging`] – `tracing` bootstrap (`RUST_LOG`, `WARDEN_LOG_FORMAT`).

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::{ConfigError, ServerConfig};
pub use routes::build_router;
pub use state::AppState;
