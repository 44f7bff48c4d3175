//! `warden-server` binary.
//!
//! Startup sequence: resolve configuration (exit 1 on a malformed
//! variable), open the database and bind the listener (exit 2 on failure),
//! auto-resume any runs left `running` by a previous process, then serve
//! until Ctrl-C.

use std::sync::Arc;

use warden_audit::{ControlStore, EventLog};
use warden_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() {
    warden_server::logging::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("startup failure: {e}");
        std::process::exit(2);
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(ControlStore::open(&config.database_path)?);
    let log = Arc::new(EventLog::open(&config.database_path)?);

    let state = AppState::build(&config, store, log);

    let resumed = state.runs.auto_resume()?;
    if resumed > 0 {
        tracing::info!(resumed, "auto-resumed stale run loops");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, planner_enabled = state.planner_enabled, "warden listening");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
