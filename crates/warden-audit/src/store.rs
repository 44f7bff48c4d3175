//! Mission and run rows.
//!
//! The relational contract the governance layer needs from its store:
//! mission CRUD, run creation, and guarded status transitions:
//! `running → {stopped | completed | failed}` for runs, with terminal states
//! never re-opening.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use warden_types::{new_id, Mission, MissionStatus, Point, Run, RunStatus, WardenError};

use crate::event_log::AuditError;

// ─────────────────────────────────────────────────────────────────────────────
// ControlStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store for mission and run rows.
///
/// Usually opened on the same database file as the [`EventLog`]
/// (`crate::EventLog`); the tables are disjoint.
pub struct ControlStore {
    conn: Mutex<Connection>,
}

impl ControlStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AuditError> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS missions (
                id         TEXT NOT NULL PRIMARY KEY,
                title      TEXT NOT NULL,
                goal       TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS runs (
                id         TEXT NOT NULL PRIMARY KEY,
                mission_id TEXT NOT NULL,
                status     TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at   TEXT
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Missions
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_mission(&self, title: &str, goal: Point) -> Result<Mission, AuditError> {
        let mission = Mission {
            id: new_id("msn"),
            title: title.to_string(),
            goal,
            status: MissionStatus::Pending,
            created_at: Utc::now(),
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO missions (id, title, goal, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mission.id,
                mission.title,
                json!({"x": goal.x, "y": goal.y}).to_string(),
                mission.status.as_str(),
                mission.created_at.to_rfc3339(),
            ],
        )?;
        Ok(mission)
    }

    pub fn get_mission(&self, id: &str) -> Result<Option<Mission>, AuditError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, title, goal, status, created_at FROM missions WHERE id = ?1",
            params![id],
            map_mission,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_missions(&self) -> Result<Vec<Mission>, AuditError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, goal, status, created_at FROM missions ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], map_mission)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Update title and/or goal. Returns the refreshed row, or `None` when
    /// the mission does not exist.
    pub fn update_mission(
        &self,
        id: &str,
        title: Option<&str>,
        goal: Option<Point>,
    ) -> Result<Option<Mission>, AuditError> {
        {
            let conn = self.lock();
            if let Some(title) = title {
                conn.execute(
                    "UPDATE missions SET title = ?2 WHERE id = ?1",
                    params![id, title],
                )?;
            }
            if let Some(goal) = goal {
                conn.execute(
                    "UPDATE missions SET goal = ?2 WHERE id = ?1",
                    params![id, json!({"x": goal.x, "y": goal.y}).to_string()],
                )?;
            }
        }
        self.get_mission(id)
    }

    /// Delete a mission row. Returns `true` when a row was removed.
    pub fn delete_mission(&self, id: &str) -> Result<bool, AuditError> {
        let conn = self.lock();
        let n = conn.execute("DELETE FROM missions WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Transition a mission's status. `completed` is terminal.
    pub fn set_mission_status(
        &self,
        id: &str,
        status: MissionStatus,
    ) -> Result<Mission, WardenError> {
        let current = self
            .get_mission(id)
            .map_err(|e| WardenError::Audit(e.to_string()))?
            .ok_or_else(|| WardenError::MissionNotFound(id.to_string()))?;
        if current.status == MissionStatus::Completed && status != MissionStatus::Completed {
            return Err(WardenError::InvalidTransition(format!(
                "mission {id} is completed and cannot become {}",
                status.as_str()
            )));
        }
        let conn = self.lock();
        conn.execute(
            "UPDATE missions SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )
        .map_err(|e| WardenError::Audit(e.to_string()))?;
        Ok(Mission {
            status,
            ..current
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Runs
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_run(&self, mission_id: &str) -> Result<Run, AuditError> {
        let run = Run {
            id: new_id("run"),
            mission_id: mission_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        };
        let conn = self.lock();
        conn.execute(
            "INSERT INTO runs (id, mission_id, status, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![
                run.id,
                run.mission_id,
                run.status.as_str(),
                run.started_at.to_rfc3339(),
            ],
        )?;
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>, AuditError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, mission_id, status, started_at, ended_at FROM runs WHERE id = ?1",
            params![id],
            map_run,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_runs_with_status(&self, status: RunStatus) -> Result<Vec<Run>, AuditError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, mission_id, status, started_at, ended_at
             FROM runs WHERE status = ?1 ORDER BY started_at ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], map_run)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Transition a run's status. Terminal states never re-open; a run that
    /// is already terminal keeps its status (idempotent stop).
    pub fn set_run_status(&self, id: &str, status: RunStatus) -> Result<Run, WardenError> {
        let current = self
            .get_run(id)
            .map_err(|e| WardenError::Audit(e.to_string()))?
            .ok_or_else(|| WardenError::RunNotFound(id.to_string()))?;

        if current.status.is_terminal() {
            if status == current.status {
                return Ok(current);
            }
            return Err(WardenError::InvalidTransition(format!(
                "run {id} is {} and cannot become {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        let ended_at = status.is_terminal().then(Utc::now);
        let conn = self.lock();
        conn.execute(
            "UPDATE runs SET status = ?2, ended_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), ended_at.map(|t| t.to_rfc3339())],
        )
        .map_err(|e| WardenError::Audit(e.to_string()))?;
        Ok(Run {
            status,
            ended_at,
            ..current
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mappers
// ─────────────────────────────────────────────────────────────────────────────

fn map_mission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mission> {
    let goal_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let created_raw: String = row.get(4)?;
    let goal: serde_json::Value = serde_json::from_str(&goal_raw).unwrap_or(json!({}));
    Ok(Mission {
        id: row.get(0)?,
        title: row.get(1)?,
        goal: Point::new(
            goal["x"].as_f64().unwrap_or(0.0),
            goal["y"].as_f64().unwrap_or(0.0),
        ),
        status: parse_mission_status(&status_raw),
        created_at: parse_ts(&created_raw, 4)?,
    })
}

fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_raw: String = row.get(2)?;
    let started_raw: String = row.get(3)?;
    let ended_raw: Option<String> = row.get(4)?;
    Ok(Run {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        status: parse_run_status(&status_raw),
        started_at: parse_ts(&started_raw, 3)?,
        ended_at: ended_raw.map(|t| parse_ts(&t, 4)).transpose()?,
    })
}

fn parse_ts(raw: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e: chrono::ParseError| {
        rusqlite::Error::InvalidColumnType(col, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_mission_status(raw: &str) -> MissionStatus {
    match raw {
        "active" => MissionStatus::Active,
        "paused" => MissionStatus::Paused,
        "completed" => MissionStatus::Completed,
        _ => MissionStatus::Pending,
    }
}

fn parse_run_status(raw: &str) -> RunStatus {
    match raw {
        "stopped" => RunStatus::Stopped,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        _ => RunStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> ControlStore {
        ControlStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_mission() {
        let store = open_store();
        let m = store.create_mission("Deliver crate", Point::new(15.0, 7.0)).unwrap();
        let got = store.get_mission(&m.id).unwrap().unwrap();
        assert_eq!(got.title, "Deliver crate");
        assert_eq!(got.goal.x, 15.0);
        assert_eq!(got.status, MissionStatus::Pending);
    }

    #[test]
    fn list_missions_in_creation_order() {
        let store = open_store();
        store.create_mission("first", Point::new(1.0, 1.0)).unwrap();
        store.create_mission("second", Point::new(2.0, 2.0)).unwrap();
        let all = store.list_missions().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn update_mission_title_and_goal() {
        let store = open_store();
        let m = store.create_mission("old", Point::new(0.0, 0.0)).unwrap();
        let updated = store
            .update_mission(&m.id, Some("new"), Some(Point::new(3.0, 4.0)))
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "new");
        assert_eq!(updated.goal.y, 4.0);
    }

    #[test]
    fn delete_mission() {
        let store = open_store();
        let m = store.create_mission("gone", Point::new(0.0, 0.0)).unwrap();
        assert!(store.delete_mission(&m.id).unwrap());
        assert!(store.get_mission(&m.id).unwrap().is_none());
        assert!(!store.delete_mission(&m.id).unwrap());
    }

    #[test]
    fn completed_mission_cannot_reopen() {
        let store = open_store();
        let m = store.create_mission("m", Point::new(0.0, 0.0)).unwrap();
        store.set_mission_status(&m.id, MissionStatus::Completed).unwrap();
        let err = store.set_mission_status(&m.id, MissionStatus::Active);
        assert!(matches!(err, Err(WardenError::InvalidTransition(_))));
    }

    #[test]
    fn run_starts_running() {
        let store = open_store();
        let m = store.create_mission("m", Point::new(0.0, 0.0)).unwrap();
        let run = store.create_run(&m.id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.ended_at.is_none());
    }

    #[test]
    fn run_terminal_status_sets_ended_at() {
        let store = open_store();
        let m = store.create_mission("m", Point::new(0.0, 0.0)).unwrap();
        let run = store.create_run(&m.id).unwrap();
        let done = store.set_run_status(&run.id, RunStatus::Completed).unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.ended_at.is_some());
    }

    #[test]
    fn terminal_run_never_reopens() {
        let store = open_store();
        let m = store.create_mission("m", Point::new(0.0, 0.0)).unwrap();
        let run = store.create_run(&m.id).unwrap();
        store.set_run_status(&run.id, RunStatus::Stopped).unwrap();
        let err = store.set_run_status(&run.id, RunStatus::Running);
        assert!(matches!(err, Err(WardenError::InvalidTransition(_))));
        // Re-asserting the same terminal status is idempotent.
        let again = store.set_run_status(&run.id, RunStatus::Stopped).unwrap();
        assert_eq!(again.status, RunStatus::Stopped);
    }

    #[test]
    fn list_runs_with_status_filters() {
        let store = open_store();
        let m = store.create_mission("m", Point::new(0.0, 0.0)).unwrap();
        let r1 = store.create_run(&m.id).unwrap();
        let _r2 = store.create_run(&m.id).unwrap();
        store.set_run_status(&r1.id, RunStatus::Failed).unwrap();
        let running = store.list_runs_with_status(RunStatus::Running).unwrap();
        assert_eq!(running.len(), 1);
        let failed = store.list_runs_with_status(RunStatus::Failed).unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn missing_run_is_an_error_on_transition() {
        let store = open_store();
        let err = store.set_run_status("run_missing", RunStatus::Stopped);
        assert!(matches!(err, Err(WardenError::RunNotFound(_))));
    }
}
