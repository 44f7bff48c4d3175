//! The append-only, hash-chained event log.
//!
//! Every run owns a chain of events: contiguous `seq` starting at 1, each
//! event's `prev_hash` equal to its predecessor's `hash`, and each `hash`
//! computed over the canonical JSON of
//! `{seq, run_id, ts, type, payload, prev_hash}`.
//!
//! # Storage layout
//!
//! A single table `events`:
//!
//! | column    | type      | description                                |
//! |-----------|-----------|--------------------------------------------|
//! | run_id    | TEXT      | owning run                                 |
//! | seq       | INTEGER   | 1-based position in the run's chain        |
//! | id        | TEXT      | opaque unique id (`evt_…`)                 |
//! | ts        | TEXT      | RFC-3339 UTC, microsecond precision        |
//! | type      | TEXT      | TELEMETRY/DECISION/EXECUTION/…             |
//! | payload   | TEXT      | type-specific JSON object                  |
//! | prev_hash | CHAR(64)  | predecessor's hash, or 64 zeros for seq 1  |
//! | hash      | CHAR(64)  | SHA-256 of the canonical preimage          |
//!
//! The column serialization never affects `hash`: the digest is computed at
//! append time over the canonical bytes and stored alongside.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::{json, Value};
use thiserror::Error;
use warden_types::{new_id, Event, EventType};

use crate::canonical::{hash_canonical, ZERO_HASH};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from audit-log operations.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("concurrent append on run {0}")]
    ConcurrentAppend(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Verify report
// ─────────────────────────────────────────────────────────────────────────────

/// Result of re-walking a run's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub ok: bool,
    /// `seq` of the first event whose linkage fails, when `ok` is false.
    pub break_at: Option<i64>,
}

impl VerifyReport {
    fn intact() -> Self {
        Self {
            ok: true,
            break_at: None,
        }
    }

    fn broken_at(seq: i64) -> Self {
        Self {
            ok: false,
            break_at: Some(seq),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventLog
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed chain-of-trust event log.
///
/// Appends are serialized through an internal mutex; under the
/// single-writer-per-run discipline of the run loop, the
/// [`AuditError::ConcurrentAppend`] path never triggers in-process, but the
/// primary key on `(run_id, seq)` still guards against a second appender and
/// the write is retried once when it fires.
pub struct EventLog {
    conn: Mutex<Connection>,
}

impl EventLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.init_schema()?;
        Ok(log)
    }

    /// Open a private in-memory log (tests).
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<(), AuditError> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                run_id    TEXT NOT NULL,
                seq       INTEGER NOT NULL,
                id        TEXT NOT NULL,
                ts        TEXT NOT NULL,
                type      TEXT NOT NULL,
                payload   TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash      TEXT NOT NULL,
                PRIMARY KEY (run_id, seq),
                UNIQUE (run_id, hash)
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-write; the connection itself is
        // still consistent (SQLite transactions), so recover the guard.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a new event to `run_id`'s chain.
    ///
    /// Allocates the next `seq`, links `prev_hash`, clamps `ts` so the chain
    /// is strictly monotonic even if the wall clock steps back, computes the
    /// canonical hash, and persists the row.
    ///
    /// # Errors
    ///
    /// [`AuditError::ConcurrentAppend`] when two appenders race on the same
    /// run and the single retry also loses.
    pub fn append(
        &self,
        run_id: &str,
        kind: EventType,
        payload: &Value,
    ) -> Result<Event, AuditError> {
        match self.try_append(run_id, kind, payload) {
            Err(AuditError::ConcurrentAppend(_)) => {
                tracing::warn!(run_id, "concurrent append detected, retrying once");
                self.try_append(run_id, kind, payload)
            }
            other => other,
        }
    }

    fn try_append(
        &self,
        run_id: &str,
        kind: EventType,
        payload: &Value,
    ) -> Result<Event, AuditError> {
        let conn = self.lock();

        let prev: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT seq, hash, ts FROM events WHERE run_id = ?1
                 ORDER BY seq DESC LIMIT 1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (seq, prev_hash, prev_ts) = match prev {
            Some((seq, hash, ts)) => (seq + 1, hash, Some(ts)),
            None => (1, ZERO_HASH.to_string(), None),
        };

        let ts = next_monotonic_ts(prev_ts.as_deref());
        let ts_str = ts.to_rfc3339_opts(SecondsFormat::Micros, true);

        let preimage = json!({
            "seq": seq,
            "run_id": run_id,
            "ts": ts_str,
            "type": kind.as_str(),
            "payload": payload,
            "prev_hash": prev_hash,
        });
        let hash = hash_canonical(&preimage);
        let id = new_id("evt");

        let inserted = conn.execute(
            "INSERT INTO events (run_id, seq, id, ts, type, payload, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                seq,
                id,
                ts_str,
                kind.as_str(),
                payload.to_string(),
                prev_hash,
                hash,
            ],
        );

        match inserted {
            Ok(_) => Ok(Event {
                seq,
                id,
                run_id: run_id.to_string(),
                ts,
                kind,
                payload: payload.clone(),
                prev_hash,
                hash,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(AuditError::ConcurrentAppend(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List a run's events ordered by `seq` ascending, optionally starting
    /// after `since_seq`.
    pub fn list(&self, run_id: &str, since_seq: Option<i64>) -> Result<Vec<Event>, AuditError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, id, ts, type, payload, prev_hash, hash
             FROM events WHERE run_id = ?1 AND seq > ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id, since_seq.unwrap_or(0)], |row| {
            Ok(RawRow {
                seq: row.get(0)?,
                id: row.get(1)?,
                ts: row.get(2)?,
                kind: row.get(3)?,
                payload: row.get(4)?,
                prev_hash: row.get(5)?,
                hash: row.get(6)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event(run_id)?);
        }
        Ok(events)
    }

    /// The most recent event of a run, if any.
    pub fn last(&self, run_id: &str) -> Result<Option<Event>, AuditError> {
        let conn = self.lock();
        let row: Option<RawRow> = conn
            .query_row(
                "SELECT seq, id, ts, type, payload, prev_hash, hash
                 FROM events WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![run_id],
                |row| {
                    Ok(RawRow {
                        seq: row.get(0)?,
                        id: row.get(1)?,
                        ts: row.get(2)?,
                        kind: row.get(3)?,
                        payload: row.get(4)?,
                        prev_hash: row.get(5)?,
                        hash: row.get(6)?,
                    })
                },
            )
            .optional()?;
        row.map(|r| r.into_event(run_id)).transpose()
    }

    /// The most recent event of a given type for a run, if any.
    pub fn last_of_type(
        &self,
        run_id: &str,
        kind: EventType,
    ) -> Result<Option<Event>, AuditError> {
        let conn = self.lock();
        let row: Option<RawRow> = conn
            .query_row(
                "SELECT seq, id, ts, type, payload, prev_hash, hash
                 FROM events WHERE run_id = ?1 AND type = ?2
                 ORDER BY seq DESC LIMIT 1",
                params![run_id, kind.as_str()],
                |row| {
                    Ok(RawRow {
                        seq: row.get(0)?,
                        id: row.get(1)?,
                        ts: row.get(2)?,
                        kind: row.get(3)?,
                        payload: row.get(4)?,
                        prev_hash: row.get(5)?,
                        hash: row.get(6)?,
                    })
                },
            )
            .optional()?;
        row.map(|r| r.into_event(run_id)).transpose()
    }

    /// Re-walk a run's chain, recomputing every hash from the stored fields.
    ///
    /// The reported `break_at` is the `seq` of the first event whose
    /// `prev_hash` does not match the **recomputed** hash of its predecessor
    /// (or whose `seq` breaks contiguity): tampering with event *n* surfaces
    /// at *n + 1*, where the linkage snaps.
    pub fn verify(&self, run_id: &str) -> Result<VerifyReport, AuditError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, ts, type, payload, prev_hash
             FROM events WHERE run_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut expected_prev = ZERO_HASH.to_string();
        let mut expected_seq = 1i64;
        for row in rows {
            let (seq, ts, kind, payload, prev_hash) = row?;
            if seq != expected_seq || prev_hash != expected_prev {
                return Ok(VerifyReport::broken_at(seq));
            }
            let payload: Value = serde_json::from_str(&payload)
                .map_err(|e| AuditError::CorruptRow(format!("run {run_id} seq {seq}: {e}")))?;
            let preimage = json!({
                "seq": seq,
                "run_id": run_id,
                "ts": ts,
                "type": kind,
                "payload": payload,
                "prev_hash": prev_hash,
            });
            expected_prev = hash_canonical(&preimage);
            expected_seq += 1;
        }
        Ok(VerifyReport::intact())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

struct RawRow {
    seq: i64,
    id: String,
    ts: String,
    kind: String,
    payload: String,
    prev_hash: String,
    hash: String,
}

impl RawRow {
    fn into_event(self, run_id: &str) -> Result<Event, AuditError> {
        let ts: DateTime<Utc> = self
            .ts
            .parse()
            .map_err(|e| AuditError::CorruptRow(format!("bad ts {}: {e}", self.ts)))?;
        let kind: EventType = serde_json::from_value(Value::String(self.kind.clone()))
            .map_err(|e| AuditError::CorruptRow(format!("bad type {}: {e}", self.kind)))?;
        let payload: Value = serde_json::from_str(&self.payload)
            .map_err(|e| AuditError::CorruptRow(format!("bad payload: {e}")))?;
        Ok(Event {
            seq: self.seq,
            id: self.id,
            run_id: run_id.to_string(),
            ts,
            kind,
            payload,
            prev_hash: self.prev_hash,
            hash: self.hash,
        })
    }
}

/// Next event timestamp: wall clock truncated to the stored microsecond
/// precision, clamped to `prev + 1µs` whenever the wall clock has not
/// advanced past the previous event.
fn next_monotonic_ts(prev: Option<&str>) -> DateTime<Utc> {
    let now = truncate_to_micros(Utc::now());
    match prev.and_then(|p| p.parse::<DateTime<Utc>>().ok()) {
        Some(prev_ts) if now <= prev_ts => prev_ts + Duration::microseconds(1),
        _ => now,
    }
}

fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    let sub_micro_nanos = i64::from(t.timestamp_subsec_nanos() % 1_000);
    t - Duration::nanoseconds(sub_micro_nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_log() -> EventLog {
        EventLog::open_in_memory().unwrap()
    }

    #[test]
    fn first_event_links_from_zero_hash() {
        let log = open_log();
        let e = log.append("run_a", EventType::Decision, &json!({"n": 1})).unwrap();
        assert_eq!(e.seq, 1);
        assert_eq!(e.prev_hash, ZERO_HASH);
        assert_eq!(e.hash.len(), 64);
    }

    #[test]
    fn seq_is_contiguous_and_chain_links() {
        let log = open_log();
        for i in 0..5 {
            log.append("run_a", EventType::Decision, &json!({"n": i})).unwrap();
        }
        let events = log.list("run_a", None).unwrap();
        assert_eq!(events.len(), 5);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.seq, i as i64 + 1);
            if i > 0 {
                assert_eq!(e.prev_hash, events[i - 1].hash);
            }
        }
    }

    #[test]
    fn chains_are_independent_per_run() {
        let log = open_log();
        log.append("run_a", EventType::Decision, &json!({"n": 1})).unwrap();
        let b = log.append("run_b", EventType::Decision, &json!({"n": 1})).unwrap();
        assert_eq!(b.seq, 1);
        assert_eq!(b.prev_hash, ZERO_HASH);
    }

    #[test]
    fn timestamps_are_strictly_increasing() {
        let log = open_log();
        let mut prev = None;
        for i in 0..20 {
            let e = log.append("run_a", EventType::Telemetry, &json!({"n": i})).unwrap();
            if let Some(p) = prev {
                assert!(e.ts > p, "ts must be strictly monotonic");
            }
            prev = Some(e.ts);
        }
    }

    #[test]
    fn list_since_seq_skips_earlier_events() {
        let log = open_log();
        for i in 0..6 {
            log.append("run_a", EventType::Decision, &json!({"n": i})).unwrap();
        }
        let tail = log.list("run_a", Some(4)).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 5);
    }

    #[test]
    fn verify_ok_on_intact_chain() {
        let log = open_log();
        for i in 0..10 {
            log.append("run_a", EventType::Decision, &json!({"n": i})).unwrap();
        }
        let report = log.verify("run_a").unwrap();
        assert!(report.ok);
        assert_eq!(report.break_at, None);
    }

    #[test]
    fn verify_ok_on_empty_chain() {
        let log = open_log();
        assert!(log.verify("no_such_run").unwrap().ok);
    }

    #[test]
    fn tampered_payload_breaks_chain_at_successor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let log = EventLog::open(&path).unwrap();
        for i in 0..20 {
            log.append("run_a", EventType::Decision, &json!({"n": i})).unwrap();
        }

        // Mutate event seq=10 behind the log's back.
        let raw = Connection::open(&path).unwrap();
        raw.execute(
            "UPDATE events SET payload = ?1 WHERE run_id = 'run_a' AND seq = 10",
            params![json!({"n": 999}).to_string()],
        )
        .unwrap();

        let report = log.verify("run_a").unwrap();
        assert!(!report.ok);
        assert_eq!(report.break_at, Some(11));
    }

    #[test]
    fn tampered_final_event_reports_clean_chain_prefix() {
        // Tampering with the last event cannot be caught by linkage alone;
        // the chain up to it still verifies. This documents the boundary of
        // prev-link verification.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let log = EventLog::open(&path).unwrap();
        for i in 0..3 {
            log.append("run_a", EventType::Decision, &json!({"n": i})).unwrap();
        }
        let raw = Connection::open(&path).unwrap();
        raw.execute(
            "UPDATE events SET prev_hash = ?1 WHERE run_id = 'run_a' AND seq = 3",
            params!["f".repeat(64)],
        )
        .unwrap();
        let report = log.verify("run_a").unwrap();
        assert_eq!(report.break_at, Some(3));
    }

    #[test]
    fn interleaved_appends_across_runs_all_verify() {
        let log = open_log();
        for i in 0..100 {
            let run = format!("run_{}", i % 10);
            log.append(&run, EventType::Decision, &json!({"n": i})).unwrap();
        }
        for r in 0..10 {
            let run = format!("run_{r}");
            assert!(log.verify(&run).unwrap().ok, "chain {run} must verify");
            assert_eq!(log.list(&run, None).unwrap().len(), 10);
        }
    }

    #[test]
    fn hash_matches_manual_recomputation() {
        let log = open_log();
        let e = log
            .append("run_a", EventType::Execution, &json!({"command": {"intent": "STOP"}}))
            .unwrap();
        let preimage = json!({
            "seq": e.seq,
            "run_id": e.run_id,
            "ts": e.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            "type": e.kind.as_str(),
            "payload": e.payload,
            "prev_hash": e.prev_hash,
        });
        assert_eq!(e.hash, hash_canonical(&preimage));
    }

    #[test]
    fn last_and_last_of_type() {
        let log = open_log();
        log.append("run_a", EventType::Decision, &json!({"n": 1})).unwrap();
        log.append("run_a", EventType::Plan, &json!({"wp": 1})).unwrap();
        log.append("run_a", EventType::Decision, &json!({"n": 2})).unwrap();

        assert_eq!(log.last("run_a").unwrap().unwrap().seq, 3);
        let plan = log.last_of_type("run_a", EventType::Plan).unwrap().unwrap();
        assert_eq!(plan.seq, 2);
        assert!(log.last("missing").unwrap().is_none());
    }
}
