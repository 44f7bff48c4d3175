//! Agent decision memory.
//!
//! A ring buffer of the most recent `(proposal, decision)` outcomes. The
//! agentic loop reads it two ways: the summary feeds the API response, and
//! the trailing consecutive-denial count triggers a forced graceful stop.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_types::{ActionProposal, Decision, GovernanceDecision, PolicyState};

/// How many outcomes the ring retains.
pub const MEMORY_CAPACITY: usize = 10;

/// One remembered outcome.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub ts: DateTime<Utc>,
    pub intent: String,
    pub decision: Decision,
    pub policy_hits: Vec<String>,
    pub reasons: Vec<String>,
    pub policy_state: PolicyState,
    pub executed: bool,
}

/// Aggregate view of the ring, exposed through the agentic API.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemorySummary {
    pub total_entries: usize,
    pub approved: usize,
    /// Denials and review requests both count as "did not go through".
    pub denied: usize,
    /// Trailing consecutive non-approvals.
    pub denial_count: usize,
}

/// Sliding window of past decisions and outcomes.
#[derive(Default)]
pub struct AgentMemory {
    entries: VecDeque<MemoryEntry>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, evicting the oldest entry beyond capacity.
    pub fn record(&mut self, proposal: &ActionProposal, decision: &GovernanceDecision, executed: bool) {
        self.entries.push_back(MemoryEntry {
            ts: Utc::now(),
            intent: proposal.action.name().to_string(),
            decision: decision.decision,
            policy_hits: decision.policy_hits.clone(),
            reasons: decision.reasons.clone(),
            policy_state: decision.policy_state,
            executed,
        });
        while self.entries.len() > MEMORY_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    /// Trailing consecutive entries that were not approved.
    pub fn consecutive_denials(&self) -> usize {
        self.entries
            .iter()
            .rev()
            .take_while(|e| e.decision != Decision::Approved)
            .count()
    }

    /// Reasons attached to the most recent non-approval, newest first.
    pub fn last_denial_reasons(&self) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.decision != Decision::Approved)
            .map(|e| e.reasons.clone())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> MemorySummary {
        MemorySummary {
            total_entries: self.entries.len(),
            approved: self
                .entries
                .iter()
                .filter(|e| e.decision == Decision::Approved)
                .count(),
            denied: self
                .entries
                .iter()
                .filter(|e| e.decision != Decision::Approved)
                .count(),
            denial_count: self.consecutive_denials(),
        }
    }

    /// Compact prompt context: the most recent outcomes, oldest first.
    pub fn to_context(&self) -> String {
        if self.entries.is_empty() {
            return "No previous decisions.".to_string();
        }
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| {
                let hits = if e.policy_hits.is_empty() {
                    "none".to_string()
                } else {
                    e.policy_hits.join(", ")
                };
                format!(
                    "- {} -> {:?} (policies: {hits}; executed: {})",
                    e.intent, e.decision, e.executed
                )
            })
            .collect();
        format!("Recent decision history:\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::ActionProposal;

    fn approved() -> GovernanceDecision {
        GovernanceDecision::approved()
    }

    fn denied(reason: &str) -> GovernanceDecision {
        GovernanceDecision {
            decision: Decision::Denied,
            policy_state: PolicyState::Stop,
            policy_hits: vec!["HUMAN_PROX_01".to_string()],
            reasons: vec![reason.to_string()],
            required_action: Some("halt".to_string()),
            risk_score: 0.9,
        }
    }

    #[test]
    fn ring_caps_at_capacity() {
        let mut mem = AgentMemory::new();
        for _ in 0..15 {
            mem.record(&ActionProposal::stop(""), &approved(), true);
        }
        assert_eq!(mem.summary().total_entries, MEMORY_CAPACITY);
    }

    #[test]
    fn summary_counts_approved_and_denied() {
        let mut mem = AgentMemory::new();
        mem.record(&ActionProposal::move_to(1.0, 1.0, 0.3, ""), &approved(), true);
        mem.record(&ActionProposal::move_to(2.0, 2.0, 0.9, ""), &denied("human"), false);
        let s = mem.summary();
        assert_eq!(s.total_entries, 2);
        assert_eq!(s.approved, 1);
        assert_eq!(s.denied, 1);
        assert_eq!(s.denial_count, 1);
    }

    #[test]
    fn denial_count_is_consecutive_and_resets_on_approval() {
        let mut mem = AgentMemory::new();
        mem.record(&ActionProposal::stop(""), &denied("a"), false);
        mem.record(&ActionProposal::stop(""), &denied("b"), false);
        assert_eq!(mem.consecutive_denials(), 2);
        mem.record(&ActionProposal::stop(""), &approved(), true);
        assert_eq!(mem.consecutive_denials(), 0);
        mem.record(&ActionProposal::stop(""), &denied("c"), false);
        assert_eq!(mem.consecutive_denials(), 1);
    }

    #[test]
    fn last_denial_reasons_returns_newest_denial() {
        let mut mem = AgentMemory::new();
        mem.record(&ActionProposal::stop(""), &denied("older"), false);
        mem.record(&ActionProposal::stop(""), &denied("newer"), false);
        mem.record(&ActionProposal::stop(""), &approved(), true);
        assert_eq!(mem.last_denial_reasons(), vec!["newer".to_string()]);
    }

    #[test]
    fn context_mentions_recorded_intents() {
        let mut mem = AgentMemory::new();
        assert!(mem.to_context().contains("No previous decisions"));
        mem.record(&ActionProposal::move_to(5.0, 5.0, 0.4, ""), &approved(), true);
        let ctx = mem.to_context();
        assert!(ctx.contains("MOVE_TO"));
        assert!(ctx.contains("Approved"));
    }
}
