//! The published policy catalog.
//!
//! Human-readable descriptions of every rule the engine enforces, served at
//! `GET /policies`. Keep the ids in lockstep with `engine.rs`.

use warden_types::{PolicyInfo, Severity};

/// Describe every rule in the catalog, ordered by policy id.
pub fn catalog() -> Vec<PolicyInfo> {
    vec![
        PolicyInfo {
            policy_id: "BATTERY_01".to_string(),
            name: "Low battery advisory".to_string(),
            description: "Battery below 20% flags movement for operator review.".to_string(),
            severity: Severity::Low,
        },
        PolicyInfo {
            policy_id: "COLLISION_01".to_string(),
            name: "Collision radius".to_string(),
            description: "An obstacle inside the collision radius denies movement and demands a replan.".to_string(),
            severity: Severity::High,
        },
        PolicyInfo {
            policy_id: "GEOFENCE_01".to_string(),
            name: "Geofence containment".to_string(),
            description: "Targets outside the geofence are denied outright.".to_string(),
            severity: Severity::High,
        },
        PolicyInfo {
            policy_id: "HUMAN_PROX_01".to_string(),
            name: "Human stop radius".to_string(),
            description: "A human inside the stop radius halts all movement.".to_string(),
            severity: Severity::High,
        },
        PolicyInfo {
            policy_id: "HUMAN_PROX_02".to_string(),
            name: "Human slow radius".to_string(),
            description: "A human inside the slow radius caps speed at the slow limit.".to_string(),
            severity: Severity::Medium,
        },
        PolicyInfo {
            policy_id: "PATH_BLOCKED_01".to_string(),
            name: "Path clearance".to_string(),
            description: "An obstacle on the straight segment to the target requires a replan.".to_string(),
            severity: Severity::Medium,
        },
        PolicyInfo {
            policy_id: "SPEED_LIMIT_01".to_string(),
            name: "Zone speed limit".to_string(),
            description: "Proposed speed above the zone limit requires a reduction.".to_string(),
            severity: Severity::Medium,
        },
    ]
}
