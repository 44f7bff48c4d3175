//! `warden-audit` – Chain of Trust
//!
//! Tamper-evident audit storage for the governance layer.
//!
//! # Modules
//!
//! - [`canonical`] – deterministic JSON serialization and SHA-256 hashing;
//!   the hash preimage format shared by writers and verifiers.
//! - [`event_log`] – [`EventLog`]: the per-run append-only event chain with
//!   `append` / `list` / `verify`.
//! - [`store`] – [`ControlStore`]: mission and run rows with guarded status
//!   transitions.

pub mod canonical;
pub mod event_log;
pub mod store;

pub use canonical::{canonical_bytes, hash_canonical, sha256_hex, ZERO_HASH};
pub use event_log::{AuditError, EventLog, VerifyReport};
pub use store::ControlStore;
