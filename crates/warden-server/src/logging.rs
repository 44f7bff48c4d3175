//! Tracing bootstrap.
//!
//! Call [`init`] once at process startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `WARDEN_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |

use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber.
///
/// Safe to call once; a second call (e.g. from tests) is ignored.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if use_json_format() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .try_init()
    };
    if result.is_err() {
        // A subscriber is already installed; keep it.
    }
}

fn use_json_format() -> bool {
    std::env::var("WARDEN_LOG_FORMAT").as_deref() == Ok("json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_format_detection() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("WARDEN_LOG_FORMAT", "json") };
        assert!(use_json_format());
        unsafe { std::env::set_var("WARDEN_LOG_FORMAT", "compact") };
        assert!(!use_json_format());
        unsafe { std::env::remove_var("WARDEN_LOG_FORMAT") };
    }

    #[test]
    fn double_init_is_harmless() {
        init();
        init();
    }
}
